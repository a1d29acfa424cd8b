//! Dodeca minify cell (cell-minify)
//!
//! This cell minifies JavaScript chunks handed over by the host, one at a time.

use dodeca_cell_runtime::run_cell;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    run_cell!("minify", |task| dodeca_minify::minify(task))
}
