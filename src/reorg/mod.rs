//! Chain reorganization detection and recovery.
//!
//! Block hashes are stored for every block that carried a persisted event and
//! for the last block of every scanned batch. Before each scan batch the
//! [`ReorgDetector`] compares the stored hashes behind the cursor with the
//! chain:
//!
//! 1. **Newest record matches**: nothing to do
//! 2. **Mismatch**: binary search over the stored records for the common
//!    ancestor, then roll storage back to it in one transaction
//! 3. **No record in the window matches**: [`ReorgTooDeep`](crate::error::IndexerError::ReorgTooDeep);
//!    storage is left alone and the operator has to step in
//!
//! After a rollback the cursor sits at the ancestor and the scanner simply
//! rescans forward.

pub mod detector;

pub use detector::ReorgDetector;
