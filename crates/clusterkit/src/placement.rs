//! Mirror placement.
//!
//! The mirror of segment `i` goes to the machine of `segments[(i + 1) % N]`.
//! When the segment list repeats a machine, that candidate may be segment
//! `i`'s own machine; the search then advances through the list (wrapping)
//! and takes the first entry on a different machine. With all-distinct hosts
//! the result is exactly `(i + 1) % N`.

use crate::types::Host;
use std::collections::BTreeSet;

/// Whether mirrors can be placed at all: more than one segment spread over
/// more than one machine.
pub fn mirrors_possible(segments: &[Host]) -> bool {
    let machines: BTreeSet<&str> = segments.iter().map(Host::machine).collect();
    segments.len() > 1 && machines.len() > 1
}

/// Index into `segments` whose machine hosts the mirror of segment `i`.
///
/// Returns `None` when `i` is out of range or no other machine exists.
pub fn mirror_host_index(segments: &[Host], i: usize) -> Option<usize> {
    let n = segments.len();
    let primary = segments.get(i)?;
    (1..n)
        .map(|step| (i + step) % n)
        .find(|&j| !segments[j].same_machine(primary))
}
