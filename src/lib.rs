//! Exam-slot allocation and room-occupancy engine behind the exam
//! administration front-end.

pub mod allocator;
pub mod config;
pub mod conflict;
pub mod data;
pub mod error;
pub mod occupancy;
pub mod server;
pub mod slots;
pub mod store;
pub mod timetable;
