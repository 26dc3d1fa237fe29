mod csv_pipeline;
mod poll_source;
mod support;
