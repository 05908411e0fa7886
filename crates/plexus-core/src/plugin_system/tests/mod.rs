pub mod hooks_tests;
pub mod integrity_tests;
pub mod transaction_tests;
