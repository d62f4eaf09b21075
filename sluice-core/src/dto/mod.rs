//! Data Transfer Objects
//!
//! Wire representations handed to external collaborators. The only
//! outbound message today is the notification sent after every run.

pub mod notification;
