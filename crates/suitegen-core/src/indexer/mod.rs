pub mod entities;
pub mod modules;
