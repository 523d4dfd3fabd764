//! Prometheus counters for SIP and MM activity

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

pub const SIP_REGISTER_OUT: &str = "sip_register_out_total";
pub const SIP_INVITE_OUT: &str = "sip_invite_out_total";
pub const SIP_MESSAGE_OUT: &str = "sip_message_out_total";
pub const SIP_BYE_OUT: &str = "sip_bye_out_total";
pub const SIP_BYE_IN: &str = "sip_bye_in_total";
pub const SIP_BYE_OK_IN: &str = "sip_bye_ok_in_total";
pub const SIP_BYE_OK_OUT: &str = "sip_bye_ok_out_total";
pub const SIP_INVITE_OK_OUT: &str = "sip_invite_ok_out_total";
pub const SIP_FAILED_REMOTE: &str = "sip_failed_remote_total";
pub const SIP_FAILED_LOCAL: &str = "sip_failed_local_total";
pub const SIP_READ_TIMEOUT: &str = "sip_read_timeout_total";
pub const SIP_LOST_PROXY: &str = "sip_lost_proxy_total";
pub const GSM_LUR_START: &str = "gsm_mm_lur_start_total";
pub const GSM_LUR_TIMEOUT: &str = "gsm_mm_lur_timeout_total";

/// Install the Prometheus exporter with an HTTP scrape listener
pub fn init_metrics(bind: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(bind)
        .install()?;
    describe_metrics();
    Ok(())
}

pub fn describe_metrics() {
    describe_counter!(SIP_REGISTER_OUT, "REGISTER requests sent");
    describe_counter!(SIP_INVITE_OUT, "INVITE requests sent, by kind");
    describe_counter!(SIP_MESSAGE_OUT, "MESSAGE requests sent");
    describe_counter!(SIP_BYE_OUT, "BYE requests sent");
    describe_counter!(SIP_BYE_IN, "BYE requests received");
    describe_counter!(SIP_BYE_OK_IN, "200 OK received for our BYE");
    describe_counter!(SIP_BYE_OK_OUT, "200 OK sent for a received BYE");
    describe_counter!(SIP_INVITE_OK_OUT, "200 OK sent for a received INVITE");
    describe_counter!(SIP_FAILED_REMOTE, "Calls failed by the remote side, by status class");
    describe_counter!(SIP_FAILED_LOCAL, "Calls failed locally");
    describe_counter!(SIP_READ_TIMEOUT, "SIP reads that timed out");
    describe_counter!(SIP_LOST_PROXY, "Transactions that never heard back from the proxy");
    describe_counter!(GSM_LUR_START, "Location updating requests started");
    describe_counter!(GSM_LUR_TIMEOUT, "Location updates that timed out at the registrar");
}

pub fn incr(name: &'static str) {
    counter!(name).increment(1);
}

pub fn record_invite_out(sos: bool) {
    let kind = if sos { "sos" } else { "normal" };
    counter!(SIP_INVITE_OUT, "kind" => kind).increment(1);
}

/// Status class label for a failed final response
pub fn status_class(code: u16) -> &'static str {
    match code {
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        600..=699 => "6xx",
        _ => "xxx",
    }
}

pub fn record_remote_failure(class: &'static str) {
    counter!(SIP_FAILED_REMOTE, "class" => class).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_class() {
        assert_eq!(status_class(302), "3xx");
        assert_eq!(status_class(404), "4xx");
        assert_eq!(status_class(503), "5xx");
        assert_eq!(status_class(606), "6xx");
        assert_eq!(status_class(700), "xxx");
    }

    #[test]
    fn test_recording_without_recorder_is_harmless() {
        describe_metrics();
        incr(SIP_LOST_PROXY);
        record_invite_out(true);
        record_remote_failure("4xx");
    }
}
