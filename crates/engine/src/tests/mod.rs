mod compaction_tests;
mod helpers;
mod recovery_tests;
