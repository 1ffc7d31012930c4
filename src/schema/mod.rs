//! Input record schema
//!
//! This module defines the wire shape of a merged student-term row and the
//! adapter that validates rows into [`StudentTermRecord`](crate::types::StudentTermRecord)s.
//! Only `student_id` and `term` are required; every other field may be absent.

mod adapter;
mod raw_record;

pub use adapter::*;
pub use raw_record::*;
