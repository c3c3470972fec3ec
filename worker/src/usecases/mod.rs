pub mod stale_pending_sweep;
