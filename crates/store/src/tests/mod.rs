mod collector_tests;
mod collection_tests;
mod helpers;
mod metadata_tests;
mod string_tests;
