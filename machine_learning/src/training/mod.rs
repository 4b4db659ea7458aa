mod param_manager;

pub use param_manager::{BackIter, FrontIter, ParamManager};
