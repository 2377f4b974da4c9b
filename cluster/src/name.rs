//! Deterministic machine naming.
//!
//! A machine set's name acts as a template with a single `%d` slot that
//! receives the replica index (`node%d` → `node0`, `node1`, …). Templates
//! without a slot get the index appended, which keeps names injective over
//! `(template, index)` either way.

/// Hostname of replica `index` of a machine set.
pub fn expand_name(template: &str, index: usize) -> String {
    match template.find("%d") {
        Some(pos) => format!("{}{}{}", &template[..pos], index, &template[pos + 2..]),
        None => format!("{template}{index}"),
    }
}

/// Container name of replica `index`: the cluster name prefixes the hostname
/// so several clusters can coexist on one backend.
pub fn container_name(cluster: &str, template: &str, index: usize) -> String {
    format!("{cluster}-{}", expand_name(template, index))
}
