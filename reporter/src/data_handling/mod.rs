pub mod bundle;
pub mod cohort;
