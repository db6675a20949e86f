//! SeaORM entities.

pub mod attempt;
