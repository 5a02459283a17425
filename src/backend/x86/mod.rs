pub mod codegen;
pub mod register;
