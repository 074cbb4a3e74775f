/*!
# ibwatch DevKit - stubs and helpers for testing the InfiniBand check

- Scripted port sources that record how they were invoked
- Instrumentation that is present or absent on demand
- An event store whose lookups and inserts can be made to fail
- Builders for history events and ports
- A harness running check cycles at chosen timestamps
*/

pub mod fixtures;
pub mod source_stub;
pub mod store_stub;
pub mod test_utils;

pub use fixtures::{port, EventBuilder};
pub use source_stub::{StubInstrumentation, StubSource};
pub use store_stub::FailingStore;
pub use test_utils::TestHarness;
