mod queue;
mod support;
