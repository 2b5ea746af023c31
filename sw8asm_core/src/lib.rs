pub mod assembler;
pub mod isa;
pub mod utils;
