use {crate::syncer::SyncerState, prometheus::IntGauge};

#[derive(prometheus_metric_storage::MetricStorage, Clone, Debug)]
#[metric(subsystem = "node_rpc")]
pub(crate) struct Metrics {
    /// Number of inflight HTTP RPC requests.
    #[metric(labels("endpoint", "method"))]
    requests_inflight: prometheus::IntGaugeVec,

    /// Number of completed HTTP RPC requests.
    #[metric(labels("endpoint", "method"))]
    requests_complete: prometheus::IntCounterVec,

    /// Execution time for each HTTP RPC request attempt.
    #[metric(labels("endpoint", "method"))]
    requests_duration_seconds: prometheus::HistogramVec,

    /// Number of times a call moved on to the next endpoint after a failure.
    #[metric(labels("endpoint"))]
    endpoint_failovers: prometheus::IntCounterVec,

    /// Number of delayed retries requested by rate limiting nodes.
    #[metric(labels("endpoint"))]
    rate_limit_backoffs: prometheus::IntCounterVec,

    /// Number of requests waiting for a response on a socket.
    pub socket_pending_requests: IntGauge,

    /// Number of subscription notifications received on a socket.
    pub socket_notifications: prometheus::IntCounter,

    /// Number of state transitions per syncer kind and target state.
    #[metric(labels("syncer", "state"))]
    syncer_transitions: prometheus::IntCounterVec,
}

impl Metrics {
    pub fn get() -> &'static Self {
        Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
    }

    #[must_use]
    pub fn on_request_start(&self, endpoint: &str, method: &str) -> impl Drop + use<> {
        let requests_inflight = self.requests_inflight.with_label_values(&[endpoint, method]);
        let requests_complete = self.requests_complete.with_label_values(&[endpoint, method]);
        let requests_duration_seconds = self
            .requests_duration_seconds
            .with_label_values(&[endpoint, method]);

        requests_inflight.inc();
        let timer = requests_duration_seconds.start_timer();

        scopeguard::guard(timer, move |timer| {
            requests_inflight.dec();
            requests_complete.inc();
            timer.stop_and_record();
        })
    }

    pub fn on_failover(&self, endpoint: &str) {
        self.endpoint_failovers.with_label_values(&[endpoint]).inc();
    }

    pub fn on_rate_limit(&self, endpoint: &str) {
        self.rate_limit_backoffs.with_label_values(&[endpoint]).inc();
    }

    pub fn on_transition(&self, syncer: &str, state: &SyncerState) {
        self.syncer_transitions
            .with_label_values(&[syncer, state.label()])
            .inc();
    }
}
