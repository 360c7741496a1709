pub mod bookkeeping;
pub mod engine;
pub mod projector;
pub mod request;
pub mod settle;
