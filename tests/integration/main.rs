mod failover_test;
mod pipeline_test;
