pub mod analytics;
pub mod core;
pub mod grades;
pub mod marks;
pub mod schools;
pub mod students;
pub mod subjects;
