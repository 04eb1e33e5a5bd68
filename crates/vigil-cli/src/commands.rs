pub mod check;
pub mod profiles;
