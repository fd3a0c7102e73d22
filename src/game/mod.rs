pub mod character;
pub mod constants;
pub mod maze;
