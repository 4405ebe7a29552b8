//! Summary hash over the registry contents.

/// Blake3 over the sorted `(name, content id)` pairs.
///
/// Used as a convergence check only; there are no inclusion proofs.
pub fn merkle_root<'a>(leaves: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut leaves: Vec<(&str, &str)> = leaves.into_iter().collect();
    leaves.sort_unstable();

    let mut hasher = blake3::Hasher::new();
    for (name, content_id) in leaves {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
        hasher.update(content_id.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize().as_bytes())
}
