pub mod checksum;
pub mod path_utils;
pub mod retry;
pub mod task_control;
