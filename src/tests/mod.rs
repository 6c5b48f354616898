mod helpers;

mod server_tests;
