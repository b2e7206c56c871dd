pub mod chooser;
pub mod rle;

pub use chooser::choose_cl_lengths;
pub use rle::{run_groups, RleCode, RleDpCache, Run, COST_INF};
