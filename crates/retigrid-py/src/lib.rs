pub mod grid_bindings;
pub mod measure_bindings;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use pyo3::prelude::*;

#[pymodule]
#[pyo3(name = "_retigrid")]
mod retigrid {
    use super::*;

    #[pymodule]
    mod grid_bindings {
        #[pymodule_export]
        use crate::grid_bindings::{
            circular_mask,
            split_circle_into_quadrants,
            etdrs_grid,
            square_grid,
            peripapillary_grid,
        };
    }

    #[pymodule]
    mod measure_bindings {
        #[pymodule_export]
        use crate::measure_bindings::measure_grid;
    }
}
