pub mod machine_tests;
pub mod supervisor_tests;
