pub mod merged;
pub mod update;
