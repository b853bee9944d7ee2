//! In-memory [`ProtocolEngine`] driven by test scripts.
//!
//! Tests queue remote events (opens, attaches, transfers, dispositions) on
//! the engine, then feed any frame to the converter so it drains them. Every
//! call the converter makes is recorded for assertions.

use std::collections::{BTreeMap, VecDeque};

use amqp_bridge::{
    auth::SaslOutcome,
    engine::{
        ControlAction,
        DeliveryHandle,
        DeliveryState,
        EngineError,
        EngineEvent,
        LinkHandle,
        LinkRole,
        ProtocolEngine,
        RecvChunk,
        RemoteTarget,
        SenderSettleMode,
        SessionHandle,
        Source,
        Symbol,
    },
    error::ErrorCondition,
    value::PropertyValue,
};
use bytes::{Bytes, BytesMut};

const CONTROL_DECLARE: u8 = 0;
const CONTROL_DISCHARGE: u8 = 1;
const CONTROL_OTHER: u8 = 2;

/// Encode a coordinator control action the way [`ScriptedEngine`] decodes
/// it: a tag byte followed by the action's fields.
#[must_use]
pub fn encode_control(action: &ControlAction) -> Bytes {
    let mut buf = BytesMut::new();
    match action {
        ControlAction::Declare { global_id } => {
            buf.extend_from_slice(&[CONTROL_DECLARE]);
            if let Some(id) = global_id {
                buf.extend_from_slice(id);
            }
        }
        ControlAction::Discharge { txn_id, fail } => {
            buf.extend_from_slice(&[CONTROL_DISCHARGE, u8::from(*fail)]);
            buf.extend_from_slice(txn_id);
        }
        ControlAction::Other(name) => {
            buf.extend_from_slice(&[CONTROL_OTHER]);
            buf.extend_from_slice(name.as_bytes());
        }
    }
    buf.freeze()
}

/// What the converter did to the connection.
#[derive(Clone, Debug, Default)]
pub struct ConnectionRecord {
    /// Capabilities offered in our open.
    pub offered_capabilities: Vec<Symbol>,
    /// Properties sent in our open.
    pub properties: Vec<(Symbol, PropertyValue)>,
    /// Condition attached to our close.
    pub condition: Option<ErrorCondition>,
    /// Whether our open was sent.
    pub opened: bool,
    /// Number of times our close was sent.
    pub closed: usize,
}

impl ConnectionRecord {
    /// Value of an open property.
    #[must_use]
    pub fn property(&self, key: &Symbol) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }
}

/// What the converter did to a session.
#[derive(Clone, Debug, Default)]
pub struct SessionRecord {
    /// Incoming capacity set by the converter.
    pub incoming_capacity: Option<usize>,
    /// Whether our begin was sent.
    pub opened: bool,
    /// Whether our end was sent.
    pub closed: bool,
    /// Whether the session was freed.
    pub freed: bool,
}

/// Remote and local state of a link.
#[derive(Clone, Debug)]
pub struct LinkRecord {
    /// Owning session.
    pub session: SessionHandle,
    /// The bridge's role.
    pub role: LinkRole,
    /// Link name.
    pub name: String,
    /// Source sent by the peer.
    pub remote_source: Option<Source>,
    /// Target sent by the peer.
    pub remote_target: Option<RemoteTarget>,
    /// Source set by the converter.
    pub source: Option<Source>,
    /// Target set by the converter.
    pub target: Option<RemoteTarget>,
    /// Condition set by the converter.
    pub condition: Option<ErrorCondition>,
    /// Peer's sender settle mode.
    pub settle_mode: SenderSettleMode,
    /// Current credit.
    pub credit: i32,
    /// Every credit grant made by the converter.
    pub flowed: Vec<u32>,
    /// Number of drained reports.
    pub drained: usize,
    /// Whether our attach was sent.
    pub opened: bool,
    /// Whether our detach with `closed = true` was sent.
    pub closed: bool,
    /// Whether our detach with `closed = false` was sent.
    pub detached: bool,
    /// Whether the link was freed.
    pub freed: bool,
    /// Bytes the engine accepts from `send` before pushing back; `None` is
    /// unlimited.
    pub send_budget: Option<usize>,
    incoming: VecDeque<DeliveryHandle>,
    current: Option<DeliveryHandle>,
    completed: Vec<DeliveryHandle>,
}

impl LinkRecord {
    fn new(session: SessionHandle, role: LinkRole, name: &str) -> Self {
        Self {
            session,
            role,
            name: name.to_owned(),
            remote_source: None,
            remote_target: None,
            source: None,
            target: None,
            condition: None,
            settle_mode: SenderSettleMode::default(),
            credit: 0,
            flowed: Vec::new(),
            drained: 0,
            opened: false,
            closed: false,
            detached: false,
            freed: false,
            send_budget: None,
            incoming: VecDeque::new(),
            current: None,
            completed: Vec::new(),
        }
    }
}

/// State of a delivery in either direction.
#[derive(Clone, Debug)]
pub struct DeliveryRecord {
    /// Link carrying the delivery.
    pub link: LinkHandle,
    /// Delivery tag.
    pub tag: Bytes,
    /// More transfers follow.
    pub partial: bool,
    /// Peer has settled.
    pub remotely_settled: bool,
    /// Peer's disposition state.
    pub remote_state: Option<DeliveryState>,
    /// Message format of an incoming delivery.
    pub message_format: u32,
    /// Last disposition set by the converter.
    pub local_state: Option<DeliveryState>,
    /// Converter has settled.
    pub settled: bool,
    /// Bytes sent by the converter on an outgoing delivery.
    pub payload: BytesMut,
    chunks: VecDeque<Bytes>,
}

impl DeliveryRecord {
    fn new(link: LinkHandle, tag: Bytes) -> Self {
        Self {
            link,
            tag,
            partial: false,
            remotely_settled: false,
            remote_state: None,
            message_format: 0,
            local_state: None,
            settled: false,
            payload: BytesMut::new(),
            chunks: VecDeque::new(),
        }
    }
}

/// A queued remote action. Fragments reach the delivery only when their
/// event is popped, the way transfers arrive off the wire.
#[derive(Debug)]
enum Scripted {
    Event(EngineEvent),
    Fragment {
        delivery: DeliveryHandle,
        chunk: Bytes,
        last: bool,
    },
}

/// Scripted protocol engine.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    events: VecDeque<Scripted>,
    output: BytesMut,
    input: Vec<Bytes>,
    input_error: Option<String>,
    /// Max frame size applied by the converter.
    pub max_frame_size: Option<u32>,
    /// Channel max applied by the converter.
    pub channel_max: Option<u16>,
    /// Mechanisms offered when SASL started.
    pub sasl_offered: Vec<String>,
    /// Outcome reported at the end of SASL.
    pub sasl_outcome: Option<SaslOutcome>,
    sasl_mechanism: Option<String>,
    sasl_response: Bytes,
    remote_container: Option<String>,
    connection: ConnectionRecord,
    sessions: BTreeMap<SessionHandle, SessionRecord>,
    links: BTreeMap<LinkHandle, LinkRecord>,
    deliveries: BTreeMap<DeliveryHandle, DeliveryRecord>,
    next_handle: u64,
}

impl ScriptedEngine {
    /// Create an engine with nothing scripted.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Make the next `input` call fail to decode.
    pub fn fail_input(&mut self, message: &str) { self.input_error = Some(message.to_owned()); }

    /// Every chunk fed to the engine.
    #[must_use]
    pub fn input(&self) -> &[Bytes] { &self.input }

    /// Queue an engine event directly.
    pub fn push_event(&mut self, event: EngineEvent) { self.events.push_back(Scripted::Event(event)); }

    /// Script the peer choosing `mechanism` with `response`.
    pub fn sasl_init(&mut self, mechanism: &str, response: &[u8]) {
        self.sasl_mechanism = Some(mechanism.to_owned());
        self.sasl_response = Bytes::copy_from_slice(response);
    }

    /// Script the peer's open.
    pub fn remote_open(&mut self, container: Option<&str>) {
        self.remote_container = container.map(str::to_owned);
        self.events.push_back(Scripted::Event(EngineEvent::ConnectionRemoteOpen));
    }

    /// Script the peer's close.
    pub fn remote_close(&mut self) {
        self.events
            .push_back(Scripted::Event(EngineEvent::ConnectionRemoteClose));
    }

    /// Script the peer beginning a session.
    pub fn begin_session(&mut self) -> SessionHandle {
        let session = SessionHandle::new(self.next_handle());
        self.sessions.insert(session, SessionRecord::default());
        self.events.push_back(Scripted::Event(EngineEvent::SessionRemoteOpen(session)));
        session
    }

    /// Script the peer ending a session.
    pub fn end_session(&mut self, session: SessionHandle) {
        self.events.push_back(Scripted::Event(EngineEvent::SessionRemoteClose(session)));
    }

    fn attach(&mut self, session: SessionHandle, role: LinkRole, name: &str) -> LinkHandle {
        let link = LinkHandle::new(self.next_handle());
        self.links.insert(link, LinkRecord::new(session, role, name));
        self.events.push_back(Scripted::Event(EngineEvent::LinkRemoteOpen(link)));
        link
    }

    /// Script the peer attaching a sender; the bridge receives on it.
    pub fn attach_producer(
        &mut self,
        session: SessionHandle,
        name: &str,
        target: Option<RemoteTarget>,
    ) -> LinkHandle {
        let link = self.attach(session, LinkRole::Receiver, name);
        if let Some(record) = self.links.get_mut(&link) {
            record.remote_target = target;
        }
        link
    }

    /// Script the peer attaching a receiver; the bridge sends on it.
    pub fn attach_consumer(
        &mut self,
        session: SessionHandle,
        name: &str,
        source: Option<Source>,
        credit: i32,
        settle_mode: SenderSettleMode,
    ) -> LinkHandle {
        let link = self.attach(session, LinkRole::Sender, name);
        if let Some(record) = self.links.get_mut(&link) {
            record.remote_source = source;
            record.credit = credit;
            record.settle_mode = settle_mode;
        }
        link
    }

    /// Script the peer detaching `link` without closing it.
    pub fn remote_detach(&mut self, link: LinkHandle) {
        self.events.push_back(Scripted::Event(EngineEvent::LinkRemoteDetach(link)));
    }

    /// Script the peer closing `link`.
    pub fn remote_close_link(&mut self, link: LinkHandle) {
        self.events.push_back(Scripted::Event(EngineEvent::LinkRemoteClose(link)));
    }

    /// Script the peer setting the credit on a consumer link.
    pub fn grant_credit(&mut self, link: LinkHandle, credit: i32) {
        if let Some(record) = self.links.get_mut(&link) {
            record.credit = credit;
        }
        self.events.push_back(Scripted::Event(EngineEvent::LinkFlow(link)));
    }

    /// Limit the bytes a consumer link accepts before pushing back.
    pub fn set_send_budget(&mut self, link: LinkHandle, budget: Option<usize>) {
        if let Some(record) = self.links.get_mut(&link) {
            record.send_budget = budget;
        }
    }

    /// Script a complete incoming message on a producer link.
    pub fn transfer(
        &mut self,
        link: LinkHandle,
        body: &[u8],
        settled: bool,
        state: Option<DeliveryState>,
    ) -> DeliveryHandle {
        self.transfer_fragments(link, &[body], settled, state)
    }

    /// Script an incoming message split over several transfers. Each
    /// fragment raises its own delivery event.
    pub fn transfer_fragments(
        &mut self,
        link: LinkHandle,
        fragments: &[&[u8]],
        settled: bool,
        state: Option<DeliveryState>,
    ) -> DeliveryHandle {
        let delivery = DeliveryHandle::new(self.next_handle());
        let mut record = DeliveryRecord::new(link, Bytes::from(format!("in-{delivery}")));
        record.remotely_settled = settled;
        record.remote_state = state;
        record.partial = true;
        self.deliveries.insert(delivery, record);
        if let Some(link_record) = self.links.get_mut(&link) {
            link_record.incoming.push_back(delivery);
            link_record.credit -= 1;
        }
        let last = fragments.len().saturating_sub(1);
        for (index, fragment) in fragments.iter().enumerate() {
            self.append_fragment(delivery, fragment, index == last);
        }
        if fragments.is_empty()
            && let Some(record) = self.deliveries.get_mut(&delivery)
        {
            record.partial = false;
            self.events.push_back(Scripted::Event(EngineEvent::Delivery(delivery)));
        }
        delivery
    }

    /// Queue one transfer of an incoming delivery.
    fn append_fragment(&mut self, delivery: DeliveryHandle, fragment: &[u8], last: bool) {
        self.events.push_back(Scripted::Fragment {
            delivery,
            chunk: Bytes::copy_from_slice(fragment),
            last,
        });
    }

    /// Script a coordinator control message.
    pub fn control(&mut self, link: LinkHandle, action: &ControlAction) -> DeliveryHandle {
        self.transfer(link, &encode_control(action), false, None)
    }

    /// Script the peer's disposition of a delivery the bridge sent.
    pub fn dispose(&mut self, delivery: DeliveryHandle, state: DeliveryState, settled: bool) {
        if let Some(record) = self.deliveries.get_mut(&delivery) {
            record.remote_state = Some(state);
            record.remotely_settled = settled;
        }
        self.events.push_back(Scripted::Event(EngineEvent::Delivery(delivery)));
    }

    /// Connection record.
    #[must_use]
    pub fn connection(&self) -> &ConnectionRecord { &self.connection }

    /// Session record.
    ///
    /// # Panics
    ///
    /// Panics if the session was never scripted.
    #[must_use]
    pub fn session(&self, session: SessionHandle) -> &SessionRecord {
        self.sessions.get(&session).expect("unknown session")
    }

    /// Link record.
    ///
    /// # Panics
    ///
    /// Panics if the link was never scripted.
    #[must_use]
    pub fn link(&self, link: LinkHandle) -> &LinkRecord {
        self.links.get(&link).expect("unknown link")
    }

    /// Delivery record.
    ///
    /// # Panics
    ///
    /// Panics if the delivery does not exist.
    #[must_use]
    pub fn delivery(&self, delivery: DeliveryHandle) -> &DeliveryRecord {
        self.deliveries.get(&delivery).expect("unknown delivery")
    }

    /// Deliveries created by the converter on consumer link `link`, oldest
    /// first.
    #[must_use]
    pub fn outgoing(&self, link: LinkHandle) -> Vec<DeliveryHandle> {
        if self.links.get(&link).is_none_or(|record| record.role != LinkRole::Sender) {
            return Vec::new();
        }
        self.deliveries
            .iter()
            .filter(|(_, record)| record.link == link)
            .map(|(handle, _)| *handle)
            .collect()
    }

    /// Payloads of outgoing deliveries fully written on `link`.
    #[must_use]
    pub fn sent_messages(&self, link: LinkHandle) -> Vec<Bytes> {
        self.links.get(&link).map_or_else(Vec::new, |record| {
            record
                .completed
                .iter()
                .filter_map(|d| self.deliveries.get(d))
                .map(|d| d.payload.clone().freeze())
                .collect()
        })
    }

    fn complete_current(&mut self, link: LinkHandle) {
        if let Some(record) = self.links.get_mut(&link)
            && let Some(current) = record.current.take()
        {
            record.completed.push(current);
            record.credit -= 1;
        }
    }
}

impl ProtocolEngine for ScriptedEngine {
    fn input(&mut self, bytes: &[u8]) -> Result<usize, EngineError> {
        if let Some(message) = self.input_error.take() {
            return Err(EngineError::Decode(message));
        }
        self.input.push(Bytes::copy_from_slice(bytes));
        Ok(bytes.len())
    }

    fn pending_output(&self) -> Option<Bytes> {
        (!self.output.is_empty()).then(|| Bytes::copy_from_slice(&self.output))
    }

    fn output_consumed(&mut self, count: usize) {
        let count = count.min(self.output.len());
        let _ = self.output.split_to(count);
    }

    fn next_event(&mut self) -> Option<EngineEvent> {
        match self.events.pop_front()? {
            Scripted::Event(event) => Some(event),
            Scripted::Fragment {
                delivery,
                chunk,
                last,
            } => {
                if let Some(record) = self.deliveries.get_mut(&delivery) {
                    record.chunks.push_back(chunk);
                    record.partial = !last;
                }
                Some(EngineEvent::Delivery(delivery))
            }
        }
    }

    fn set_max_frame_size(&mut self, size: u32) { self.max_frame_size = Some(size); }

    fn set_channel_max(&mut self, max: u16) { self.channel_max = Some(max); }

    fn sasl_server(&mut self, mechanisms: &[&str]) {
        self.sasl_offered = mechanisms.iter().map(|m| (*m).to_owned()).collect();
    }

    fn sasl_remote_mechanism(&self) -> Option<String> {
        self.sasl_outcome
            .is_none()
            .then(|| self.sasl_mechanism.clone())
            .flatten()
    }

    fn sasl_recv(&mut self) -> Bytes { std::mem::take(&mut self.sasl_response) }

    fn sasl_done(&mut self, outcome: SaslOutcome) {
        self.sasl_outcome = Some(outcome);
        self.output.extend_from_slice(b"SASL-OUTCOME;");
    }

    fn remote_container(&self) -> Option<String> { self.remote_container.clone() }

    fn set_offered_capabilities(&mut self, capabilities: Vec<Symbol>) {
        self.connection.offered_capabilities = capabilities;
    }

    fn set_connection_properties(&mut self, properties: Vec<(Symbol, PropertyValue)>) {
        self.connection.properties = properties;
    }

    fn set_connection_condition(&mut self, condition: ErrorCondition) {
        self.connection.condition = Some(condition);
    }

    fn open_connection(&mut self) {
        self.connection.opened = true;
        self.output.extend_from_slice(b"OPEN;");
    }

    fn close_connection(&mut self) {
        self.connection.closed += 1;
        self.output.extend_from_slice(b"CLOSE;");
    }

    fn set_session_incoming_capacity(&mut self, session: SessionHandle, capacity: usize) {
        self.sessions.entry(session).or_default().incoming_capacity = Some(capacity);
    }

    fn open_session(&mut self, session: SessionHandle) {
        self.sessions.entry(session).or_default().opened = true;
    }

    fn close_session(&mut self, session: SessionHandle) {
        self.sessions.entry(session).or_default().closed = true;
    }

    fn free_session(&mut self, session: SessionHandle) {
        self.sessions.entry(session).or_default().freed = true;
    }

    fn session_links(&self, session: SessionHandle) -> Vec<LinkHandle> {
        self.links
            .iter()
            .filter(|(_, record)| record.session == session && !record.freed)
            .map(|(handle, _)| *handle)
            .collect()
    }

    fn link_session(&self, link: LinkHandle) -> Option<SessionHandle> {
        self.links.get(&link).map(|record| record.session)
    }

    fn link_role(&self, link: LinkHandle) -> Option<LinkRole> {
        self.links.get(&link).map(|record| record.role)
    }

    fn link_name(&self, link: LinkHandle) -> String {
        self.links
            .get(&link)
            .map(|record| record.name.clone())
            .unwrap_or_default()
    }

    fn remote_source(&self, link: LinkHandle) -> Option<Source> {
        self.links.get(&link).and_then(|record| record.remote_source.clone())
    }

    fn remote_target(&self, link: LinkHandle) -> Option<RemoteTarget> {
        self.links.get(&link).and_then(|record| record.remote_target.clone())
    }

    fn set_source(&mut self, link: LinkHandle, source: Option<Source>) {
        if let Some(record) = self.links.get_mut(&link) {
            record.source = source;
        }
    }

    fn set_target(&mut self, link: LinkHandle, target: Option<RemoteTarget>) {
        if let Some(record) = self.links.get_mut(&link) {
            record.target = target;
        }
    }

    fn set_link_condition(&mut self, link: LinkHandle, condition: ErrorCondition) {
        if let Some(record) = self.links.get_mut(&link) {
            record.condition = Some(condition);
        }
    }

    fn remote_sender_settle_mode(&self, link: LinkHandle) -> SenderSettleMode {
        self.links
            .get(&link)
            .map(|record| record.settle_mode)
            .unwrap_or_default()
    }

    fn credit(&self, link: LinkHandle) -> i32 { self.links.get(&link).map_or(0, |record| record.credit) }

    fn flow(&mut self, link: LinkHandle, credit: u32) {
        if let Some(record) = self.links.get_mut(&link) {
            record.credit = record.credit.saturating_add(i32::try_from(credit).unwrap_or(i32::MAX));
            record.flowed.push(credit);
        }
    }

    fn drained(&mut self, link: LinkHandle) {
        if let Some(record) = self.links.get_mut(&link) {
            record.drained += 1;
        }
    }

    fn open_link(&mut self, link: LinkHandle) {
        if let Some(record) = self.links.get_mut(&link) {
            record.opened = true;
        }
    }

    fn close_link(&mut self, link: LinkHandle) {
        if let Some(record) = self.links.get_mut(&link) {
            record.closed = true;
        }
    }

    fn detach_link(&mut self, link: LinkHandle) {
        if let Some(record) = self.links.get_mut(&link) {
            record.detached = true;
        }
    }

    fn free_link(&mut self, link: LinkHandle) {
        if let Some(record) = self.links.get_mut(&link) {
            record.freed = true;
        }
    }

    fn recv(&mut self, link: LinkHandle) -> RecvChunk {
        let Some(delivery) = self.links.get(&link).and_then(|r| r.incoming.front().copied()) else {
            return RecvChunk::End;
        };
        let Some(record) = self.deliveries.get_mut(&delivery) else {
            return RecvChunk::End;
        };
        match record.chunks.pop_front() {
            Some(chunk) => RecvChunk::Data(chunk),
            None if record.partial => RecvChunk::Pending,
            None => RecvChunk::End,
        }
    }

    fn advance(&mut self, link: LinkHandle) {
        let role = self.links.get(&link).map(|record| record.role);
        match role {
            Some(LinkRole::Receiver) => {
                if let Some(record) = self.links.get_mut(&link) {
                    record.incoming.pop_front();
                }
            }
            Some(LinkRole::Sender) => self.complete_current(link),
            None => {}
        }
    }

    fn create_delivery(&mut self, link: LinkHandle, tag: Bytes) -> DeliveryHandle {
        let delivery = DeliveryHandle::new(self.next_handle());
        self.deliveries.insert(delivery, DeliveryRecord::new(link, tag));
        if let Some(record) = self.links.get_mut(&link) {
            record.current = Some(delivery);
        }
        delivery
    }

    fn send(&mut self, link: LinkHandle, bytes: &[u8]) -> usize {
        let Some(record) = self.links.get_mut(&link) else {
            return 0;
        };
        let Some(current) = record.current else {
            return 0;
        };
        let accepted = record.send_budget.map_or(bytes.len(), |budget| budget.min(bytes.len()));
        if let Some(budget) = record.send_budget.as_mut() {
            *budget -= accepted;
        }
        if let Some(delivery) = self.deliveries.get_mut(&current) {
            delivery.payload.extend_from_slice(&bytes[..accepted]);
        }
        accepted
    }

    fn delivery_link(&self, delivery: DeliveryHandle) -> Option<LinkHandle> {
        self.deliveries.get(&delivery).map(|record| record.link)
    }

    fn is_readable(&self, delivery: DeliveryHandle) -> bool {
        self.deliveries
            .get(&delivery)
            .and_then(|record| self.links.get(&record.link))
            .is_some_and(|link| {
                link.role == LinkRole::Receiver && link.incoming.front() == Some(&delivery)
            })
    }

    fn remotely_settled(&self, delivery: DeliveryHandle) -> bool {
        self.deliveries
            .get(&delivery)
            .is_some_and(|record| record.remotely_settled)
    }

    fn remote_state(&self, delivery: DeliveryHandle) -> Option<DeliveryState> {
        self.deliveries
            .get(&delivery)
            .and_then(|record| record.remote_state.clone())
    }

    fn message_format(&self, delivery: DeliveryHandle) -> u32 {
        self.deliveries
            .get(&delivery)
            .map_or(0, |record| record.message_format)
    }

    fn delivery_tag(&self, delivery: DeliveryHandle) -> Bytes {
        self.deliveries
            .get(&delivery)
            .map(|record| record.tag.clone())
            .unwrap_or_default()
    }

    fn disposition(&mut self, delivery: DeliveryHandle, state: DeliveryState) {
        if let Some(record) = self.deliveries.get_mut(&delivery) {
            record.local_state = Some(state);
        }
    }

    fn settle(&mut self, delivery: DeliveryHandle) {
        let Some(record) = self.deliveries.get_mut(&delivery) else {
            return;
        };
        record.settled = true;
        let link = record.link;
        if self.links.get(&link).is_some_and(|l| l.current == Some(delivery)) {
            self.complete_current(link);
        }
    }

    fn decode_control(&self, body: &[u8]) -> Result<ControlAction, EngineError> {
        match body {
            [CONTROL_DECLARE] => Ok(ControlAction::Declare { global_id: None }),
            [CONTROL_DECLARE, global_id @ ..] => Ok(ControlAction::Declare {
                global_id: Some(Bytes::copy_from_slice(global_id)),
            }),
            [CONTROL_DISCHARGE, fail, txn_id @ ..] => Ok(ControlAction::Discharge {
                txn_id: Bytes::copy_from_slice(txn_id),
                fail: *fail != 0,
            }),
            [CONTROL_OTHER, name @ ..] => Ok(ControlAction::Other(
                String::from_utf8_lossy(name).into_owned(),
            )),
            _ => Err(EngineError::Control(format!("unknown control body {body:?}"))),
        }
    }
}
