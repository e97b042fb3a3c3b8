//! Change sets and the commit DAG.
//!
//! History is stored as rows keyed by id; walks load parents on demand and
//! cycles are prevented by reachability checks when edges are added.

pub mod change_set;
pub mod commit;
pub mod transition;
pub mod walk;

pub use change_set::{create_change_set, get_change_set};
pub use commit::{
    AncestorQuery, ancestors_of, create_commit, get_commit, is_ancestor, lowest_common_ancestor,
};
pub use transition::create_transition_commit;
