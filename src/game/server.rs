//! Tick scheduler and the handle connection tasks talk to it through

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::NetConfig;
use crate::util::time::{FixedStep, Timer};
use crate::ws::protocol::ServerMsg;

use super::events::GameEvent;
use super::player::PlayerId;
use super::queue::CommandQueue;
use super::snapshot::WorldSnapshot;
use super::world::{InputRejected, InvariantViolation, JoinError, WorldState};
use super::PlayerCommand;

/// Pending control messages before senders wait
const CONTROL_CHANNEL_CAPACITY: usize = 256;
/// Broadcast messages buffered per subscriber before it lags
const BROADCAST_CAPACITY: usize = 64;
/// Events kept for a broadcaster that stopped taking them
pub const MAX_PENDING_EVENTS: usize = 4096;

/// Join and leave requests, handled by the tick task between ticks
#[derive(Debug)]
pub enum Control {
    Join {
        name: String,
        reply: oneshot::Sender<Result<JoinAccepted, JoinError>>,
    },
    Leave {
        id: PlayerId,
    },
}

/// Reply to a successful join
#[derive(Debug, Clone)]
pub struct JoinAccepted {
    pub id: PlayerId,
    pub tick: u64,
    /// World state right after the join, new player included
    pub snapshot: Arc<WorldSnapshot>,
}

/// Counters readable from outside the tick task
#[derive(Debug, Default)]
pub struct ServerStats {
    players: AtomicUsize,
    tick: AtomicU64,
}

impl ServerStats {
    pub fn players(&self) -> usize {
        self.players.load(Ordering::Relaxed)
    }

    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct Published {
    snapshot: Arc<WorldSnapshot>,
    events: Vec<GameEvent>,
}

/// Hand-off point between the tick task and the broadcaster.
///
/// The tick task replaces the snapshot and appends events; the broadcaster
/// takes both in one lock so no event is seen twice or lost.
#[derive(Debug, Default)]
pub struct Outbox {
    inner: Mutex<Published>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, snapshot: Arc<WorldSnapshot>, events: Vec<GameEvent>) {
        let mut inner = self.inner.lock();
        inner.snapshot = snapshot;
        inner.events.extend(events);

        let len = inner.events.len();
        if len > MAX_PENDING_EVENTS {
            let excess = len - MAX_PENDING_EVENTS;
            inner.events.drain(..excess);
            warn!(dropped = excess, "Broadcaster is behind, dropped oldest events");
        }
    }

    /// Latest snapshot plus every event since the previous call
    pub fn take(&self) -> (Arc<WorldSnapshot>, Vec<GameEvent>) {
        let mut inner = self.inner.lock();
        let events = std::mem::take(&mut inner.events);
        (inner.snapshot.clone(), events)
    }
}

/// Cheap, cloneable access to a running tick task
#[derive(Clone)]
pub struct ServerHandle {
    control_tx: mpsc::Sender<Control>,
    commands: Arc<CommandQueue>,
    stats: Arc<ServerStats>,
    outbox: Arc<Outbox>,
    broadcast_tx: broadcast::Sender<ServerMsg>,
    max_players: usize,
}

impl ServerHandle {
    /// Ask the tick task for a slot. Resolves after the next tick.
    pub async fn join(&self, name: &str) -> Result<JoinAccepted, JoinError> {
        let (reply, reply_rx) = oneshot::channel();
        self.control_tx
            .send(Control::Join {
                name: name.to_string(),
                reply,
            })
            .await
            .map_err(|_| JoinError::Unavailable)?;
        reply_rx.await.map_err(|_| JoinError::Unavailable)?
    }

    /// Drop queued commands now; the entity goes at the start of the next tick.
    pub async fn leave(&self, id: PlayerId) {
        let purged = self.commands.purge(id);
        if purged > 0 {
            trace!(player_id = %id, purged, "Purged queued commands");
        }
        if self.control_tx.send(Control::Leave { id }).await.is_err() {
            debug!(player_id = %id, "Tick task gone, leave not delivered");
        }
    }

    pub fn push_command(&self, command: PlayerCommand) {
        self.commands.push(command);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.broadcast_tx.subscribe()
    }

    pub fn broadcaster(&self) -> broadcast::Sender<ServerMsg> {
        self.broadcast_tx.clone()
    }

    pub fn outbox(&self) -> Arc<Outbox> {
        self.outbox.clone()
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }
}

/// Owns the world and advances it at a fixed rate
pub struct TickScheduler {
    world: WorldState,
    clock: FixedStep,
    control_rx: mpsc::Receiver<Control>,
    control_closed: bool,
    commands: Arc<CommandQueue>,
    stats: Arc<ServerStats>,
    outbox: Arc<Outbox>,
    /// Joined players whose connection was gone before the reply
    orphans: Vec<PlayerId>,
}

impl TickScheduler {
    pub fn new(world: WorldState, net: &NetConfig) -> (Self, ServerHandle) {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let commands = Arc::new(CommandQueue::new(net.input_queue_depth));
        let stats = Arc::new(ServerStats::default());
        let outbox = Arc::new(Outbox::new());
        outbox.publish(Arc::new(world.snapshot()), Vec::new());

        let handle = ServerHandle {
            control_tx,
            commands: commands.clone(),
            stats: stats.clone(),
            outbox: outbox.clone(),
            broadcast_tx,
            max_players: world.config().max_players,
        };

        let scheduler = Self {
            clock: FixedStep::new(world.config().tick_rate),
            world,
            control_rx,
            control_closed: false,
            commands,
            stats,
            outbox,
            orphans: Vec::new(),
        };

        (scheduler, handle)
    }

    #[cfg(test)]
    pub fn world(&self) -> &WorldState {
        &self.world
    }

    /// Run ticks until every handle is dropped or the world is found corrupt.
    pub async fn run(mut self) -> Result<(), InvariantViolation> {
        info!(
            tick_rate = self.world.config().tick_rate,
            max_players = self.world.config().max_players,
            "Tick loop started"
        );

        let mut ticker = interval(self.clock.step());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = Instant::now();

        loop {
            ticker.tick().await;

            let now = Instant::now();
            let steps = self.clock.advance(now - last);
            last = now;
            if steps > 1 {
                debug!(steps, "Catching up on late ticks");
            }

            for _ in 0..steps {
                self.step()?;
            }

            if self.control_closed {
                info!(tick = self.world.tick(), "All handles dropped, tick loop stopping");
                return Ok(());
            }
        }
    }

    /// One full tick: control messages, commands, simulation, publication.
    pub fn step(&mut self) -> Result<(), InvariantViolation> {
        let timer = Timer::new();

        for id in std::mem::take(&mut self.orphans) {
            self.commands.purge(id);
            self.world.remove_player(id);
        }

        let joins = self.drain_control();

        for command in self.commands.drain() {
            match self.world.apply_command(&command) {
                Ok(()) => {}
                Err(InputRejected::UnknownEntity) => {
                    debug!(player_id = %command.player_id(), "Command for unknown player");
                }
                Err(reason) => {
                    trace!(player_id = %command.player_id(), %reason, "Command dropped");
                }
            }
        }

        self.world.run_tick();

        let results: Vec<_> = joins
            .into_iter()
            .map(|(name, reply)| (self.world.add_player(&name), reply))
            .collect();

        self.world.check_invariants()?;

        let tick = self.world.tick();
        let snapshot = Arc::new(self.world.snapshot());
        self.outbox
            .publish(snapshot.clone(), self.world.take_events());

        for (result, reply) in results {
            match result {
                Ok(player) => {
                    let accepted = JoinAccepted {
                        id: player.id,
                        tick,
                        snapshot: snapshot.clone(),
                    };
                    if reply.send(Ok(accepted)).is_err() {
                        debug!(player_id = %player.id, "Joiner went away before the reply");
                        self.orphans.push(player.id);
                    }
                }
                Err(err) => {
                    debug!(error = %err, "Join refused");
                    let _ = reply.send(Err(err));
                }
            }
        }

        self.stats
            .players
            .store(self.world.player_count(), Ordering::Relaxed);
        self.stats.tick.store(tick, Ordering::Relaxed);

        let elapsed = timer.elapsed();
        if elapsed > self.clock.step() {
            debug!(tick, elapsed_us = elapsed.as_micros() as u64, "Slow tick");
        }
        Ok(())
    }

    /// Apply leaves now, hand back joins for the end of the tick.
    fn drain_control(
        &mut self,
    ) -> Vec<(String, oneshot::Sender<Result<JoinAccepted, JoinError>>)> {
        let mut joins = Vec::new();
        loop {
            match self.control_rx.try_recv() {
                Ok(Control::Join { name, reply }) => joins.push((name, reply)),
                Ok(Control::Leave { id }) => {
                    self.commands.purge(id);
                    if self.world.remove_player(id).is_none() {
                        debug!(player_id = %id, "Leave for unknown player");
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.control_closed = true;
                    break;
                }
            }
        }
        joins
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::game::player::MoveFlags;
    use crate::game::world::tests::arena_world;
    use crate::game::InputCommand;
    use tokio_test::{assert_pending, assert_ready, task};

    fn scheduler(config: SimConfig) -> (TickScheduler, ServerHandle) {
        TickScheduler::new(arena_world(config), &NetConfig::default())
    }

    fn join_now(scheduler: &mut TickScheduler, handle: &ServerHandle, name: &str) -> JoinAccepted {
        let mut join = task::spawn(handle.join(name));
        assert_pending!(join.poll());
        scheduler.step().unwrap();
        assert_ready!(join.poll()).unwrap()
    }

    #[test]
    fn join_ack_carries_the_new_player() {
        let (mut scheduler, handle) = scheduler(SimConfig::default());
        let accepted = join_now(&mut scheduler, &handle, "ann");

        assert_eq!(accepted.id, PlayerId(1));
        assert_eq!(accepted.tick, 1);
        assert_eq!(accepted.snapshot.entities.len(), 1);
        assert_eq!(accepted.snapshot.entities[0].health, 100);
        assert_eq!(handle.stats().players(), 1);
        assert_eq!(handle.stats().tick(), 1);

        let (latest, events) = handle.outbox().take();
        assert_eq!(latest.tick, 1);
        assert_eq!(events, vec![GameEvent::Joined { id: accepted.id }]);
    }

    #[test]
    fn join_at_capacity_is_refused() {
        let (mut scheduler, handle) = scheduler(SimConfig {
            max_players: 1,
            ..SimConfig::default()
        });
        let mut first = task::spawn(handle.join("a"));
        let mut second = task::spawn(handle.join("b"));
        assert_pending!(first.poll());
        assert_pending!(second.poll());

        scheduler.step().unwrap();
        assert!(assert_ready!(first.poll()).is_ok());
        assert_eq!(
            assert_ready!(second.poll()).unwrap_err(),
            JoinError::ServerFull { max_players: 1 }
        );
        assert_eq!(scheduler.world().player_count(), 1);
    }

    #[test]
    fn leave_removes_the_player_on_the_next_tick() {
        let (mut scheduler, handle) = scheduler(SimConfig::default());
        let id = join_now(&mut scheduler, &handle, "ann").id;
        handle.outbox().take();

        handle.push_command(PlayerCommand::Input(InputCommand {
            player_id: id,
            seq: 1,
            move_flags: MoveFlags::FORWARD,
            yaw: 0.0,
            pitch: 0.0,
            jump: false,
            dash: false,
        }));
        tokio_test::block_on(handle.leave(id));
        scheduler.step().unwrap();

        assert!(scheduler.world().player(id).is_none());
        assert_eq!(handle.stats().players(), 0);
        let (_, events) = handle.outbox().take();
        assert_eq!(events, vec![GameEvent::Left { id }]);
    }

    #[test]
    fn abandoned_join_is_cleaned_up() {
        let (mut scheduler, handle) = scheduler(SimConfig::default());
        let mut join = task::spawn(handle.join("ghost"));
        assert_pending!(join.poll());
        drop(join);

        scheduler.step().unwrap();
        assert_eq!(scheduler.world().player_count(), 1);
        scheduler.step().unwrap();
        assert_eq!(scheduler.world().player_count(), 0);

        let (_, events) = handle.outbox().take();
        assert_eq!(
            events,
            vec![
                GameEvent::Joined { id: PlayerId(1) },
                GameEvent::Left { id: PlayerId(1) }
            ]
        );
    }

    #[test]
    fn queued_input_moves_the_player() {
        let (mut scheduler, handle) = scheduler(SimConfig::default());
        let accepted = join_now(&mut scheduler, &handle, "ann");
        let start = accepted.snapshot.entities[0].position;

        handle.push_command(PlayerCommand::Input(InputCommand {
            player_id: accepted.id,
            seq: 1,
            move_flags: MoveFlags::FORWARD,
            yaw: accepted.snapshot.entities[0].yaw,
            pitch: 0.0,
            jump: false,
            dash: false,
        }));
        for _ in 0..10 {
            scheduler.step().unwrap();
        }

        let moved = scheduler.world().player(accepted.id).unwrap().position();
        assert!(moved.distance(start) > 0.5);
    }

    #[test]
    fn corrupt_world_stops_the_tick() {
        let mut world = arena_world(SimConfig::default());
        let id = world.add_player("ann").unwrap().id;
        world.player_mut(id).unwrap().health = 120;

        let (mut scheduler, _handle) = TickScheduler::new(world, &NetConfig::default());
        assert!(matches!(
            scheduler.step(),
            Err(InvariantViolation::HealthOutOfRange { health: 120, .. })
        ));
    }

    #[test]
    fn outbox_caps_pending_events() {
        let outbox = Outbox::new();
        let events: Vec<GameEvent> = (0..MAX_PENDING_EVENTS as u32 + 10)
            .map(|i| GameEvent::Joined { id: PlayerId(i) })
            .collect();
        outbox.publish(Arc::new(WorldSnapshot::default()), events);

        let (_, taken) = outbox.take();
        assert_eq!(taken.len(), MAX_PENDING_EVENTS);
        assert_eq!(taken[0], GameEvent::Joined { id: PlayerId(10) });
        assert!(outbox.take().1.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_once_every_handle_is_gone() {
        let (scheduler, handle) = scheduler(SimConfig::default());
        drop(handle);
        assert_eq!(scheduler.run().await, Ok(()));
    }
}
