pub mod fragmenter;
pub mod interrupt;

pub use fragmenter::{FragmentLength, Fragmenter, parse_fragment_count};
pub use interrupt::{Checkpoint, Interruption, Outcome};
