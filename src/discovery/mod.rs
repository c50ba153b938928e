pub mod triton;
