//! Query building blocks: predicate trees and result ordering.

pub mod filter;
pub mod options;
