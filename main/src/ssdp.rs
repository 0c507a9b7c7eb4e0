use crate::network::udp_receiver;
use futures_channel::mpsc::UnboundedReceiver;
use futures_channel::mpsc::UnboundedSender;
use futures_util::stream::BoxStream;
use futures_util::Stream;
use futures_util::StreamExt;
use mockall::automock;
use nat_upnp_protocol::multicast_address_v4;
use nat_upnp_protocol::multicast_address_v6;
use nat_upnp_protocol::Headers;
use nat_upnp_protocol::SearchRequest;
use nat_upnp_protocol::SsdpMessage;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::Weak;
use std::task::Context;
use std::task::Poll;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::AbortHandle;

type SubscriptionId = u64;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct SsdpOptions {
    /// Local port for every SSDP socket, 0 picks an ephemeral one.
    pub source_port: u16,
}

/// A reply whose `ST` matched an active search.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DeviceFound {
    pub headers: Headers,

    /// Address of the socket that received the reply.
    pub local_address: IpAddr,
}

/// Source of SSDP discovery events.
#[automock]
pub trait DeviceSearch {
    fn search(&self, target: String) -> BoxStream<'static, DeviceFound>;
    fn close(&self);
}

/// SSDP control point with one UDP socket per local interface address.
///
/// Searches issued before every socket has either bound or failed are queued and broadcast
/// once the engine becomes ready.
pub struct Ssdp {
    shared: Arc<Mutex<Shared>>,
    ready: watch::Receiver<bool>,
}

impl Ssdp {
    /// Opens sockets on every non-loopback interface.
    pub fn new(options: SsdpOptions) -> std::io::Result<Self> {
        let addresses = crate::network::interfaces::local_addresses()?;
        Ok(Self::with_addresses(addresses, options))
    }

    pub fn with_addresses(
        addresses: impl IntoIterator<Item = IpAddr>,
        options: SsdpOptions,
    ) -> Self {
        Self::open(addresses, options, None)
    }

    /// Sends every M-SEARCH to `destination` instead of the multicast group of the socket family.
    fn open(
        addresses: impl IntoIterator<Item = IpAddr>,
        options: SsdpOptions,
        destination: Option<SocketAddr>,
    ) -> Self {
        let addresses: Vec<_> = addresses.into_iter().collect();
        let (ready_sender, ready) = watch::channel(false);
        let mut shared = Shared::new(addresses.len(), ready_sender);
        shared.destination = destination;
        let shared = Arc::new(Mutex::new(shared));
        for address in addresses {
            let bind_address = SocketAddr::new(address, options.source_port);
            let task = tokio::spawn(open_socket(Arc::downgrade(&shared), bind_address));
            lock(&shared).tasks.push(task.abort_handle());
        }
        Self { shared, ready }
    }

    /// Resolves once every socket has settled, or the engine is closed.
    pub async fn ready(&self) {
        let mut ready = self.ready.clone();
        let _ = ready.wait_for(|r| *r).await;
    }

    pub fn bound_addresses(&self) -> Vec<SocketAddr> {
        lock(&self.shared)
            .sockets
            .iter()
            .filter_map(|s| s.local_addr().ok())
            .collect()
    }

    /// Starts a search for `target`.
    ///
    /// Dropping the returned stream or calling [Search::end] detaches it from the engine.
    pub fn search(&self, target: impl Into<String>) -> Search {
        let target = target.into();
        let (sender, receiver) = futures_channel::mpsc::unbounded();
        let (id, broadcast) = lock(&self.shared).subscribe(target, sender);
        if let Some(broadcast) = broadcast {
            tokio::spawn(broadcast.send());
        }
        Search {
            id,
            receiver,
            shared: Arc::downgrade(&self.shared),
            ended: false,
        }
    }

    /// Shuts down every socket and ends all searches. Further searches end immediately.
    pub fn close(&self) {
        lock(&self.shared).close();
    }
}

impl Drop for Ssdp {
    fn drop(&mut self) {
        self.close();
    }
}

impl DeviceSearch for Ssdp {
    fn search(&self, target: String) -> BoxStream<'static, DeviceFound> {
        Ssdp::search(self, target).boxed()
    }

    fn close(&self) {
        Ssdp::close(self)
    }
}

/// Discovery events for one search target.
pub struct Search {
    id: SubscriptionId,
    receiver: UnboundedReceiver<DeviceFound>,
    shared: Weak<Mutex<Shared>>,
    ended: bool,
}

impl Search {
    /// Stops delivery. Events already buffered are discarded.
    pub fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.receiver.close();
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared).unsubscribe(self.id);
        }
    }
}

impl Stream for Search {
    type Item = DeviceFound;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.ended {
            return Poll::Ready(None);
        }
        self.receiver.poll_next_unpin(cx)
    }
}

impl Drop for Search {
    fn drop(&mut self) {
        self.end();
    }
}

enum State {
    Initializing { unsettled: usize },
    Ready,
}

struct Subscription {
    target: String,
    sender: UnboundedSender<DeviceFound>,

    /// Becomes true once the M-SEARCH for this subscription has been scheduled.
    active: bool,
}

struct Shared {
    state: State,
    pending: VecDeque<SubscriptionId>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    next_id: SubscriptionId,
    sockets: Vec<Arc<UdpSocket>>,
    destination: Option<SocketAddr>,
    tasks: Vec<AbortHandle>,
    closed: bool,
    ready: watch::Sender<bool>,
}

impl Shared {
    fn new(unsettled: usize, ready: watch::Sender<bool>) -> Self {
        let state = if unsettled == 0 {
            ready.send_replace(true);
            State::Ready
        } else {
            State::Initializing { unsettled }
        };
        Self {
            state,
            pending: Default::default(),
            subscriptions: Default::default(),
            next_id: 0,
            sockets: Default::default(),
            destination: None,
            tasks: Default::default(),
            closed: false,
            ready,
        }
    }

    fn subscribe(
        &mut self,
        target: String,
        sender: UnboundedSender<DeviceFound>,
    ) -> (SubscriptionId, Option<Broadcast>) {
        let id = self.next_id;
        self.next_id += 1;
        if self.closed {
            log::debug!("Search for {} on a closed engine", target);
            return (id, None);
        }

        let active = matches!(self.state, State::Ready);
        let broadcast = if active {
            Some(Broadcast {
                sockets: self.sockets.clone(),
                destination: self.destination,
                requests: vec![SearchRequest::new(target.clone())],
            })
        } else {
            log::debug!("Queueing search for {} until all sockets settle", target);
            self.pending.push_back(id);
            None
        };
        self.subscriptions.insert(
            id,
            Subscription {
                target,
                sender,
                active,
            },
        );
        (id, broadcast)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscriptions.remove(&id);
        self.pending.retain(|p| *p != id);
    }

    /// Records that one socket has bound (`Some`) or failed (`None`).
    ///
    /// Returns the queued searches on the transition to ready, exactly once.
    fn settle(&mut self, socket: Option<Arc<UdpSocket>>) -> Option<Broadcast> {
        let State::Initializing { unsettled } = &mut self.state else {
            return None;
        };
        if let Some(socket) = socket {
            self.sockets.push(socket);
        }
        *unsettled = unsettled.saturating_sub(1);
        if *unsettled > 0 {
            return None;
        }

        self.state = State::Ready;
        self.ready.send_replace(true);
        log::debug!("SSDP engine ready with {} socket(s)", self.sockets.len());
        let requests = self
            .pending
            .drain(..)
            .filter_map(|id| {
                let subscription = self.subscriptions.get_mut(&id)?;
                subscription.active = true;
                Some(SearchRequest::new(subscription.target.clone()))
            })
            .collect();
        Some(Broadcast {
            sockets: self.sockets.clone(),
            destination: self.destination,
            requests,
        })
    }

    fn dispatch(&mut self, message: &SsdpMessage, local_address: IpAddr) {
        if self.closed {
            return;
        }
        let Some(search_target) = message.headers.search_target() else {
            log::trace!("Ignoring an SSDP message without ST");
            return;
        };
        self.subscriptions.retain(|_, subscription| {
            if !subscription.active || subscription.target != search_target {
                return true;
            }
            let event = DeviceFound {
                headers: message.headers.clone(),
                local_address,
            };
            subscription.sender.unbounded_send(event).is_ok()
        });
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.sockets.clear();
        self.subscriptions.clear();
        self.pending.clear();
        self.ready.send_replace(true);
        log::debug!("SSDP engine closed");
    }
}

/// M-SEARCH queries to send from every socket.
struct Broadcast {
    sockets: Vec<Arc<UdpSocket>>,

    /// Overrides the multicast group.
    destination: Option<SocketAddr>,

    requests: Vec<SearchRequest>,
}

impl Broadcast {
    async fn send(self) {
        for request in &self.requests {
            for socket in &self.sockets {
                let destination = match (self.destination, socket.local_addr()) {
                    (Some(destination), _) => destination,
                    (None, Ok(SocketAddr::V4(_))) => multicast_address_v4(),
                    (None, Ok(SocketAddr::V6(_))) => multicast_address_v6(),
                    (None, Err(e)) => {
                        log::debug!("Skipping a socket without local address: {}", e);
                        continue;
                    }
                };
                log::debug!(
                    "Sending M-SEARCH for {} to {}",
                    request.search_target,
                    destination
                );
                if let Err(e) = socket
                    .send_to(&request.encode(destination), destination)
                    .await
                {
                    log::debug!("Failed to send M-SEARCH to {}: {}", destination, e);
                }
            }
        }
    }
}

async fn open_socket(shared: Weak<Mutex<Shared>>, address: SocketAddr) {
    let result = crate::network::socket::bind(address);
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let broadcast = {
        let mut state = lock(&shared);
        if state.closed {
            return;
        }
        match result {
            Ok(socket) => {
                log::info!("Bound SSDP socket at {:?}", socket.local_addr());
                let socket = Arc::new(socket);
                let task = tokio::spawn(receive(
                    Arc::downgrade(&shared),
                    socket.clone(),
                    address.ip(),
                ));
                state.tasks.push(task.abort_handle());
                state.settle(Some(socket))
            }
            Err(e) => {
                log::warn!("Failed to bind SSDP socket at {}: {}", address, e);
                state.settle(None)
            }
        }
    };
    if let Some(broadcast) = broadcast {
        tokio::spawn(broadcast.send());
    }
}

async fn receive(shared: Weak<Mutex<Shared>>, socket: Arc<UdpSocket>, local_address: IpAddr) {
    let mut messages = udp_receiver::receive(socket.clone());
    while let Some(result) = messages.next().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        match result {
            Ok((message, source)) => {
                log::trace!("Received {:?} from {}", message.start_line, source);
                lock(&shared).dispatch(&message, local_address);
            }
            Err(e) => {
                log::warn!("SSDP socket at {} failed: {}", local_address, e);
                lock(&shared)
                    .sockets
                    .retain(|s| !Arc::ptr_eq(s, &socket));
                return;
            }
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}
