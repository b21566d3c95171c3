mod common;
mod delivery_tests;
