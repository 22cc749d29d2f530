pub mod assessments;
pub mod backup_bundle;
pub mod core;
pub mod courses;
pub mod enrollments;
pub mod grades;
pub mod import;
pub mod reports;
pub mod setup;
pub mod students;
pub mod subjects;
