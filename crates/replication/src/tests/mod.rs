mod helpers;
mod journal_tests;
mod stream_tests;
