//! In-memory transport for exercising the archive client without a driver.
//!
//! [TestTransport] implements [TransportClient] over queues:
//! [TestPublication] records offered messages and can be scripted to
//! push back or fail, [TestSubscription] delivers pre-queued fragments
//! under controlled-poll semantics, and [CountersBuilder] assembles
//! counter registry metadata. Frames for the control protocol are built
//! with [frame_of] and [control_response_frame].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::codec::{encode_message, ControlResponse, Message, ResponseCode};
use crate::counters::{CountersReader, METADATA_RECORD_LENGTH, RECORDING_POSITION_TYPE_ID};
use crate::transport::{
    ControlledFragmentHandler, ControlledPollAction, FragmentContext, FragmentHandler, Image,
    ImageHandler, Offer, Publication, Subscription, TransportClient,
};

/// Encode a message (envelope + body) into a standalone frame.
pub fn frame_of<'a, M: Message<'a>>(message: &M) -> Vec<u8> {
    let mut buf = vec![0u8; 4096];
    let length = encode_message(&mut buf, message).expect("frame encode");
    buf.truncate(length);
    buf
}

/// Build a control response frame.
pub fn control_response_frame(
    control_session_id: i64,
    correlation_id: i64,
    relevant_id: i64,
    code: ResponseCode,
    error_message: &str,
) -> Vec<u8> {
    frame_of(&ControlResponse {
        control_session_id,
        correlation_id,
        relevant_id,
        code,
        error_message: error_message.to_string(),
    })
}

/// Publication that records offered messages.
#[derive(Debug)]
pub struct TestPublication {
    channel: String,
    stream_id: i32,
    session_id: AtomicI64,
    connected: AtomicBool,
    original: AtomicBool,
    position: AtomicI64,
    offer_count: AtomicU64,
    messages: Mutex<Vec<Vec<u8>>>,
    forced_outcomes: Mutex<VecDeque<Offer>>,
}

impl TestPublication {
    pub fn connected(channel: &str, stream_id: i32) -> Arc<Self> {
        Arc::new(Self {
            channel: channel.to_string(),
            stream_id,
            session_id: AtomicI64::new(1),
            connected: AtomicBool::new(true),
            original: AtomicBool::new(true),
            position: AtomicI64::new(0),
            offer_count: AtomicU64::new(0),
            messages: Mutex::new(Vec::new()),
            forced_outcomes: Mutex::new(VecDeque::new()),
        })
    }

    /// Script the next `count` offers to return `outcome` instead of
    /// accepting.
    pub fn fail_next_offers(&self, outcome: Offer, count: usize) {
        let mut forced = self.forced_outcomes.lock().expect("forced outcomes lock poisoned");
        for _ in 0..count {
            forced.push_back(outcome);
        }
    }

    pub fn sent_messages(&self) -> Vec<Vec<u8>> {
        self.messages.lock().expect("messages lock poisoned").clone()
    }

    pub fn offer_count(&self) -> u64 {
        self.offer_count.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_original(&self, original: bool) {
        self.original.store(original, Ordering::SeqCst);
    }

    pub fn set_session_id(&self, session_id: i32) {
        self.session_id.store(i64::from(session_id), Ordering::SeqCst);
    }

    pub fn channel_string(&self) -> String {
        self.channel.clone()
    }
}

impl Publication for TestPublication {
    fn offer(&self, message: &[u8]) -> Offer {
        self.offer_count.fetch_add(1, Ordering::SeqCst);
        if let Some(outcome) =
            self.forced_outcomes.lock().expect("forced outcomes lock poisoned").pop_front()
        {
            return outcome;
        }
        self.messages.lock().expect("messages lock poisoned").push(message.to_vec());
        Offer::Position(self.position.fetch_add(message.len() as i64, Ordering::SeqCst))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_original(&self) -> bool {
        self.original.load(Ordering::SeqCst)
    }

    fn channel(&self) -> String {
        self.channel.clone()
    }

    fn stream_id(&self) -> i32 {
        self.stream_id
    }

    fn session_id(&self) -> i32 {
        self.session_id.load(Ordering::SeqCst) as i32
    }
}

/// Image with an externally driven position.
pub struct TestImage {
    session_id: i32,
    position: AtomicI64,
    term_buffer_length: i32,
    closed: AtomicBool,
}

impl TestImage {
    pub fn new(session_id: i32, term_buffer_length: i32) -> Arc<Self> {
        Arc::new(Self {
            session_id,
            position: AtomicI64::new(0),
            term_buffer_length,
            closed: AtomicBool::new(false),
        })
    }

    pub fn set_position(&self, position: i64) {
        self.position.store(position, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Image for TestImage {
    fn session_id(&self) -> i32 {
        self.session_id
    }

    fn position(&self) -> i64 {
        self.position.load(Ordering::SeqCst)
    }

    fn term_buffer_length(&self) -> i32 {
        self.term_buffer_length
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Subscription delivering pre-queued fragments.
pub struct TestSubscription {
    channel: String,
    stream_id: i32,
    connected: AtomicBool,
    fragments: Mutex<VecDeque<(Vec<u8>, FragmentContext)>>,
    images: Mutex<Vec<Arc<TestImage>>>,
    destinations: Mutex<Vec<String>>,
}

impl TestSubscription {
    pub fn new(channel: &str, stream_id: i32) -> Arc<Self> {
        Arc::new(Self {
            channel: channel.to_string(),
            stream_id,
            connected: AtomicBool::new(true),
            fragments: Mutex::new(VecDeque::new()),
            images: Mutex::new(Vec::new()),
            destinations: Mutex::new(Vec::new()),
        })
    }

    /// Queue a whole message for delivery as one unfragmented fragment.
    pub fn enqueue(&self, message: Vec<u8>, session_id: i32) {
        self.enqueue_fragment(message, FragmentContext::unfragmented(session_id));
    }

    pub fn enqueue_fragment(&self, fragment: Vec<u8>, context: FragmentContext) {
        self.fragments
            .lock()
            .expect("fragments lock poisoned")
            .push_back((fragment, context));
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn add_image(&self, image: Arc<TestImage>) {
        self.images.lock().expect("images lock poisoned").push(image);
    }

    pub fn destinations(&self) -> Vec<String> {
        self.destinations.lock().expect("destinations lock poisoned").clone()
    }

    pub fn has_destination(&self, destination: &str) -> bool {
        self.destinations().iter().any(|d| d == destination)
    }

    pub fn pending_fragments(&self) -> usize {
        self.fragments.lock().expect("fragments lock poisoned").len()
    }
}

impl Subscription for TestSubscription {
    fn controlled_poll(
        &self,
        handler: ControlledFragmentHandler<'_>,
        fragment_limit: usize,
    ) -> usize {
        let mut count = 0;
        while count < fragment_limit {
            let next = self.fragments.lock().expect("fragments lock poisoned").pop_front();
            let Some((fragment, context)) = next else {
                break;
            };
            match handler(&fragment, &context) {
                ControlledPollAction::Continue | ControlledPollAction::Commit => count += 1,
                ControlledPollAction::Break => {
                    count += 1;
                    break;
                }
                ControlledPollAction::Abort => {
                    self.fragments
                        .lock()
                        .expect("fragments lock poisoned")
                        .push_front((fragment, context));
                    break;
                }
            }
        }
        count
    }

    fn poll(&self, handler: FragmentHandler<'_>, fragment_limit: usize) -> usize {
        let mut count = 0;
        while count < fragment_limit {
            let next = self.fragments.lock().expect("fragments lock poisoned").pop_front();
            let Some((fragment, context)) = next else {
                break;
            };
            handler(&fragment, &context);
            count += 1;
        }
        count
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn channel(&self) -> String {
        self.channel.clone()
    }

    fn stream_id(&self) -> i32 {
        self.stream_id
    }

    fn image_by_session_id(&self, session_id: i32) -> Option<Arc<dyn Image>> {
        self.images
            .lock()
            .expect("images lock poisoned")
            .iter()
            .find(|image| image.session_id == session_id)
            .map(|image| Arc::clone(image) as Arc<dyn Image>)
    }

    fn add_destination(&self, destination: &str) {
        self.destinations
            .lock()
            .expect("destinations lock poisoned")
            .push(destination.to_string());
    }

    fn remove_destination(&self, destination: &str) {
        self.destinations
            .lock()
            .expect("destinations lock poisoned")
            .retain(|d| d != destination);
    }
}

struct Registrations {
    next_registration_id: i64,
    subscriptions: HashMap<i64, Arc<TestSubscription>>,
    publications: HashMap<i64, Arc<TestPublication>>,
}

/// Transport client over in-memory publications and subscriptions.
///
/// Registered resources are findable immediately and start connected;
/// tests flip connectivity with `set_connected` where a scenario needs a
/// slow driver.
pub struct TestTransport {
    next_correlation_id: AtomicI64,
    conductor_invocations: AtomicU64,
    publications_original: AtomicBool,
    registrations: Mutex<Registrations>,
    counters: Mutex<Bytes>,
}

impl TestTransport {
    pub fn new() -> Arc<Self> {
        Self::with_first_correlation_id(1)
    }

    /// Control the correlation ids the client will allocate, so responses
    /// can be scripted ahead of the calls that await them.
    pub fn with_first_correlation_id(first: i64) -> Arc<Self> {
        Arc::new(Self {
            next_correlation_id: AtomicI64::new(first),
            conductor_invocations: AtomicU64::new(0),
            publications_original: AtomicBool::new(true),
            registrations: Mutex::new(Registrations {
                next_registration_id: 1000,
                subscriptions: HashMap::new(),
                publications: HashMap::new(),
            }),
            counters: Mutex::new(Bytes::new()),
        })
    }

    /// Whether publications registered from now on report themselves as
    /// the original creator of their stream.
    pub fn set_publications_original(&self, original: bool) {
        self.publications_original.store(original, Ordering::SeqCst);
    }

    pub fn set_counters(&self, metadata: Bytes) {
        *self.counters.lock().expect("counters lock poisoned") = metadata;
    }

    pub fn conductor_invocations(&self) -> u64 {
        self.conductor_invocations.load(Ordering::SeqCst)
    }

    pub fn subscription(&self, registration_id: i64) -> Option<Arc<TestSubscription>> {
        self.registrations
            .lock()
            .expect("registrations lock poisoned")
            .subscriptions
            .get(&registration_id)
            .cloned()
    }

    pub fn publication(&self, registration_id: i64) -> Option<Arc<TestPublication>> {
        self.registrations
            .lock()
            .expect("registrations lock poisoned")
            .publications
            .get(&registration_id)
            .cloned()
    }

    pub fn find_subscription_by_stream_id(&self, stream_id: i32) -> Option<Arc<TestSubscription>> {
        self.registrations
            .lock()
            .expect("registrations lock poisoned")
            .subscriptions
            .values()
            .find(|s| s.stream_id == stream_id)
            .cloned()
    }

    pub fn find_publication_by_stream_id(&self, stream_id: i32) -> Option<Arc<TestPublication>> {
        self.registrations
            .lock()
            .expect("registrations lock poisoned")
            .publications
            .values()
            .find(|p| p.stream_id == stream_id)
            .cloned()
    }

    fn register_subscription(&self, channel: &str, stream_id: i32) -> i64 {
        let mut registrations = self.registrations.lock().expect("registrations lock poisoned");
        let registration_id = registrations.next_registration_id;
        registrations.next_registration_id += 1;
        registrations
            .subscriptions
            .insert(registration_id, TestSubscription::new(channel, stream_id));
        registration_id
    }

    fn register_publication(&self, channel: &str, stream_id: i32) -> i64 {
        let publication = TestPublication::connected(channel, stream_id);
        publication.set_original(self.publications_original.load(Ordering::SeqCst));
        let mut registrations = self.registrations.lock().expect("registrations lock poisoned");
        let registration_id = registrations.next_registration_id;
        registrations.next_registration_id += 1;
        registrations.publications.insert(registration_id, publication);
        registration_id
    }
}

impl TransportClient for TestTransport {
    fn next_correlation_id(&self) -> i64 {
        self.next_correlation_id.fetch_add(1, Ordering::SeqCst)
    }

    fn add_subscription(&self, channel: &str, stream_id: i32) -> i64 {
        self.register_subscription(channel, stream_id)
    }

    fn add_subscription_with_handlers(
        &self,
        channel: &str,
        stream_id: i32,
        _on_available_image: Option<ImageHandler>,
        _on_unavailable_image: Option<ImageHandler>,
    ) -> i64 {
        self.register_subscription(channel, stream_id)
    }

    fn find_subscription(&self, registration_id: i64) -> Option<Arc<dyn Subscription>> {
        self.subscription(registration_id).map(|s| s as Arc<dyn Subscription>)
    }

    fn add_publication(&self, channel: &str, stream_id: i32) -> i64 {
        self.register_publication(channel, stream_id)
    }

    fn find_publication(&self, registration_id: i64) -> Option<Arc<dyn Publication>> {
        self.publication(registration_id).map(|p| p as Arc<dyn Publication>)
    }

    fn add_exclusive_publication(&self, channel: &str, stream_id: i32) -> i64 {
        self.register_publication(channel, stream_id)
    }

    fn find_exclusive_publication(&self, registration_id: i64) -> Option<Arc<dyn Publication>> {
        self.publication(registration_id).map(|p| p as Arc<dyn Publication>)
    }

    fn invoke_conductor(&self) {
        self.conductor_invocations.fetch_add(1, Ordering::SeqCst);
    }

    fn counters_metadata(&self) -> Bytes {
        self.counters.lock().expect("counters lock poisoned").clone()
    }
}

/// Assembles counter registry metadata records.
#[derive(Default)]
pub struct CountersBuilder {
    records: Vec<[u8; METADATA_RECORD_LENGTH]>,
}

impl CountersBuilder {
    /// Append an allocated counter with an arbitrary type id and key.
    pub fn counter(mut self, type_id: i32, key: &[u8]) -> Self {
        let mut record = [0u8; METADATA_RECORD_LENGTH];
        record[0..4].copy_from_slice(&1i32.to_le_bytes());
        record[4..8].copy_from_slice(&type_id.to_le_bytes());
        let key_len = key.len().min(METADATA_RECORD_LENGTH - 8);
        record[8..8 + key_len].copy_from_slice(&key[..key_len]);
        self.records.push(record);
        self
    }

    /// Append an allocated recording position counter.
    pub fn recording_position(
        self,
        recording_id: i64,
        session_id: i32,
        source_identity: &str,
    ) -> Self {
        let identity = source_identity.as_bytes();
        let mut key = Vec::with_capacity(16 + identity.len());
        key.extend_from_slice(&recording_id.to_le_bytes());
        key.extend_from_slice(&session_id.to_le_bytes());
        key.extend_from_slice(&(identity.len() as i32).to_le_bytes());
        key.extend_from_slice(identity);
        self.counter(RECORDING_POSITION_TYPE_ID, &key)
    }

    /// Mark a previously appended counter as reclaimed.
    pub fn reclaim(mut self, counter_id: usize) -> Self {
        if let Some(record) = self.records.get_mut(counter_id) {
            record[0..4].copy_from_slice(&(-1i32).to_le_bytes());
        }
        self
    }

    pub fn build_bytes(self) -> Bytes {
        let mut metadata = Vec::with_capacity(self.records.len() * METADATA_RECORD_LENGTH);
        for record in &self.records {
            metadata.extend_from_slice(record);
        }
        Bytes::from(metadata)
    }

    pub fn build(self) -> CountersReader {
        CountersReader::new(self.build_bytes())
    }
}
