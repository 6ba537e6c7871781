//! Host topology: identities, the shared status tracker and host choosers.

mod chooser;
mod plugin;
mod spec;
mod tracker;

pub use chooser::{Candidates, HostChooser, MultiHostChooser, SingleHostChooser, chooser_for};
pub use plugin::{ChooserFactory, ChooserRegistry, SharedChooser};
pub use spec::{CandidateHost, DEFAULT_PORT, HostRequirement, HostSpec, HostStatus};
pub use tracker::{HostSpecStatus, HostStatusTracker};
