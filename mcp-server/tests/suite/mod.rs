mod cancellation;
mod initialize;
mod staging_flow;
mod tools;
