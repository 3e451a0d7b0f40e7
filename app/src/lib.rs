//! Library half of the `leadline` binary: the collaborator-wiring
//! module lives here so integration tests can build the same
//! `AppState` the process boots with, without reaching into `main`.

pub mod wiring;
