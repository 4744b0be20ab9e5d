//! Generation session control: submit a prompt through an authenticated
//! browser, wait for the result, extract and download the images.
//!
//! [`GenerationController`] runs the state machine; page interpretation is
//! confined to [`SignalClassifier`] and [`ImageExtractor`] so upstream UI
//! changes stay out of the control flow.

pub mod controller;
pub mod error;
pub mod extractor;
pub mod outcome;
pub mod request;
pub mod signal;

pub use {
    controller::GenerationController,
    error::{Error, Result},
    extractor::ImageExtractor,
    outcome::{FailureReason, GenerationOutcome, GenerationStatus, RunState},
    request::GenerationRequest,
    signal::{FormSelectors, PageSignal, SignalClassifier, SurfacePolicy, without_prompt},
};
