//! Non-blocking establishment of a control session.

use std::sync::Arc;

use tracing::debug;

use crate::channel::control_request_channel;
use crate::client::ArchiveClient;
use crate::codec::ResponseCode;
use crate::config::Context;
use crate::error::{ArchiveError, ErrorCode};
use crate::poller::{
    ControlResponsePoller, RecordingDescriptorPoller, RecordingSubscriptionDescriptorPoller,
    FRAGMENT_LIMIT,
};
use crate::proxy::ArchiveProxy;
use crate::transport::{Subscription, TransportClient, YieldingIdle};
use crate::{Result, NULL_VALUE};

/// Three-phase non-blocking connect: locate the response subscription,
/// locate the request publication and send the connect request, then await
/// the acknowledgement carrying the allocated control session id.
///
/// Drive with [poll](Self::poll) until it returns true, then take the
/// session with [into_client](Self::into_client). Polling after completion
/// is harmless.
pub struct AsyncConnect {
    context: Context,
    transport: Arc<dyn TransportClient>,
    subscription_registration_id: i64,
    publication_registration_id: i64,
    subscription: Option<Arc<dyn Subscription>>,
    response_poller: Option<ControlResponsePoller>,
    proxy: Option<ArchiveProxy>,
    poller_ready: bool,
    proxy_ready: bool,
    correlation_id: i64,
    connected: bool,
}

impl AsyncConnect {
    /// Begin a connect attempt: registers the response subscription and the
    /// request publication (with the context's control stream parameters
    /// applied to the request channel).
    pub fn new(context: Context, transport: Arc<dyn TransportClient>) -> Self {
        let subscription_registration_id = transport.add_subscription(
            context.control_response_channel(),
            context.control_response_stream_id(),
        );
        let request_channel = control_request_channel(&context);
        let publication_registration_id = transport
            .add_exclusive_publication(&request_channel, context.control_request_stream_id());

        Self {
            context,
            transport,
            subscription_registration_id,
            publication_registration_id,
            subscription: None,
            response_poller: None,
            proxy: None,
            poller_ready: false,
            proxy_ready: false,
            correlation_id: NULL_VALUE,
            connected: false,
        }
    }

    /// Advance the connect by one non-blocking step.
    ///
    /// Returns true once the session is established. An ERROR response or
    /// unexpected response code raises.
    pub fn poll(&mut self) -> Result<bool> {
        if self.connected {
            return Ok(true);
        }

        if !self.poller_ready {
            if self.response_poller.is_none() {
                if let Some(subscription) =
                    self.transport.find_subscription(self.subscription_registration_id)
                {
                    self.subscription = Some(Arc::clone(&subscription));
                    self.response_poller =
                        Some(ControlResponsePoller::new(subscription, FRAGMENT_LIMIT));
                }
            }
            if let Some(poller) = &self.response_poller {
                if poller.subscription().is_connected() {
                    self.poller_ready = true;
                }
            }
        }

        if !self.proxy_ready {
            if self.proxy.is_none() {
                if let Some(publication) =
                    self.transport.find_exclusive_publication(self.publication_registration_id)
                {
                    self.proxy =
                        Some(ArchiveProxy::new(publication, self.context.message_timeout()));
                }
            }
            if let Some(proxy) = &mut self.proxy {
                if self.correlation_id == NULL_VALUE {
                    if proxy.publication().is_connected() {
                        self.correlation_id = self.transport.next_correlation_id();
                        self.proxy_ready = proxy.try_connect(
                            self.context.control_response_channel(),
                            self.context.control_response_stream_id(),
                            self.correlation_id,
                        )?;
                    }
                } else {
                    self.proxy_ready = proxy.try_connect(
                        self.context.control_response_channel(),
                        self.context.control_response_stream_id(),
                        self.correlation_id,
                    )?;
                }
            }
        }

        if self.poller_ready && self.proxy_ready {
            let poller = self
                .response_poller
                .as_mut()
                .ok_or(ArchiveError::ConnectNotComplete)?;
            poller.poll()?;

            if poller.is_poll_complete()
                && poller.correlation_id() == self.correlation_id
                && poller.is_control_response()
            {
                match poller.code() {
                    Some(ResponseCode::Ok) => {
                        debug!(
                            control_session_id = poller.control_session_id(),
                            "archive control session established"
                        );
                        self.connected = true;
                    }
                    Some(ResponseCode::Error) => {
                        return Err(ArchiveError::ErrorResponse {
                            error_code: ErrorCode::from_relevant_id(poller.relevant_id()),
                            message: poller.error_message().to_string(),
                            correlation_id: self.correlation_id,
                        });
                    }
                    Some(code) => {
                        return Err(ArchiveError::UnexpectedResponseCode { code });
                    }
                    None => {}
                }
            }
        }

        Ok(self.connected)
    }

    /// Construct the [ArchiveClient] after a completed connect, transferring
    /// ownership of the proxy and pollers.
    pub fn into_client(self) -> Result<ArchiveClient> {
        if !self.connected {
            return Err(ArchiveError::ConnectNotComplete);
        }
        let (Some(response_poller), Some(proxy), Some(subscription)) =
            (self.response_poller, self.proxy, self.subscription)
        else {
            return Err(ArchiveError::ConnectNotComplete);
        };

        let control_session_id = response_poller.control_session_id();
        let error_handler = self.context.error_handler().cloned();
        let recording_poller = RecordingDescriptorPoller::new(
            Arc::clone(&subscription),
            error_handler.clone(),
            control_session_id,
            FRAGMENT_LIMIT,
        );
        let subscription_poller = RecordingSubscriptionDescriptorPoller::new(
            subscription,
            error_handler,
            control_session_id,
            FRAGMENT_LIMIT,
        );

        Ok(ArchiveClient::new(
            &self.context,
            control_session_id,
            self.transport,
            proxy,
            response_poller,
            recording_poller,
            subscription_poller,
        ))
    }
}

/// Connect to an archive, blocking until the control session is
/// established or a connect step fails.
pub fn connect(context: Context, transport: Arc<dyn TransportClient>) -> Result<ArchiveClient> {
    let mut pending = AsyncConnect::new(context, transport);
    let idle = YieldingIdle;

    while !pending.poll()? {
        pending.transport.invoke_conductor();
        idle.idle();
    }

    pending.into_client()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_message, ConnectRequest};
    use crate::test_harness::{control_response_frame, TestTransport};

    #[test]
    fn connect_completes_and_builds_client() {
        let transport = TestTransport::with_first_correlation_id(42);
        let context = Context::default();
        let mut pending = AsyncConnect::new(context.clone(), transport.clone());

        // Request publication found and connected: the connect request goes
        // out with the first allocated correlation id.
        assert!(!pending.poll().unwrap());
        let publication = transport
            .find_publication_by_stream_id(context.control_request_stream_id())
            .expect("request publication");
        let sent = publication.sent_messages();
        assert_eq!(sent.len(), 1);
        let request = decode_message::<ConnectRequest>(&sent[0]).unwrap();
        assert_eq!(request.correlation_id, 42);
        assert_eq!(request.response_channel, context.control_response_channel());

        let subscription = transport
            .find_subscription_by_stream_id(context.control_response_stream_id())
            .expect("response subscription");
        subscription.enqueue(control_response_frame(7, 42, 0, ResponseCode::Ok, ""), 1);

        assert!(pending.poll().unwrap());
        assert!(pending.poll().unwrap());

        let client = pending.into_client().unwrap();
        assert_eq!(client.control_session_id(), 7);
    }

    #[test]
    fn error_response_fails_the_connect() {
        let transport = TestTransport::with_first_correlation_id(42);
        let context = Context::default();
        let mut pending = AsyncConnect::new(context.clone(), transport.clone());
        assert!(!pending.poll().unwrap());

        let subscription = transport
            .find_subscription_by_stream_id(context.control_response_stream_id())
            .expect("response subscription");
        subscription.enqueue(
            control_response_frame(7, 42, 8, ResponseCode::Error, "max sessions"),
            1,
        );

        let err = pending.poll().unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::MaxRecordings);
    }

    #[test]
    fn into_client_before_completion_is_an_error() {
        let transport = TestTransport::new();
        let pending = AsyncConnect::new(Context::default(), transport);
        assert!(matches!(
            pending.into_client().unwrap_err(),
            ArchiveError::ConnectNotComplete
        ));
    }

    #[test]
    fn request_channel_carries_control_stream_params() {
        let transport = TestTransport::new();
        let context = Context::default();
        let _pending = AsyncConnect::new(context.clone(), transport.clone());

        let publication = transport
            .find_publication_by_stream_id(context.control_request_stream_id())
            .expect("request publication");
        let channel = publication.channel_string();
        assert!(channel.contains("term-length=65536"));
        assert!(channel.contains("mtu=1408"));
        assert!(channel.contains("sparse=true"));
    }
}
