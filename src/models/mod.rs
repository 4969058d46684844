pub mod approval;
pub mod audit;
pub mod request;
pub mod workflow;
