//! Domain types shared by the worker crates: job payload validation,
//! generation recipes, job results and output content types.

pub mod error;
pub mod job;
pub mod media_type;
pub mod recipe;
pub mod result;
