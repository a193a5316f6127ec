mod common;
mod deletion_tests;
mod execution_tests;
mod target_tests;
