pub mod check;
pub mod mux;
pub mod record;
pub mod worker;
