//! Matchmaker service: the registry behind one lock, the routing table of
//! live connections, and the tasks that run sessions

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::game::{MatchOutcome, SessionCommand, UserId};
use crate::store::{MatchHistory, MatchRecord};
use crate::tournament::Tournament;
use crate::wire::ClientMessage;
use crate::ws::connection::ConnectionHandle;

use super::codes::normalize;
use super::registry::{JoinResult, Membership, NewSession, Pending, Registry};
use super::MatchmakingError;

/// Close code sent to a socket superseded by a newer one
const CLOSE_REPLACED: u16 = 4000;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MatchmakerStats {
    pub active_sessions: usize,
    pub tournaments: usize,
    pub connections: usize,
}

struct Inner {
    registry: Mutex<Registry>,
    connections: DashMap<UserId, ConnectionHandle>,
    history: MatchHistory,
}

#[derive(Clone)]
pub struct Matchmaker {
    inner: Arc<Inner>,
}

impl Matchmaker {
    pub fn new(config: GameConfig, history: MatchHistory) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::new(config)),
                connections: DashMap::new(),
                history,
            }),
        }
    }

    pub fn stats(&self) -> MatchmakerStats {
        let registry = self.inner.registry.lock();
        MatchmakerStats {
            active_sessions: registry.session_count(),
            tournaments: registry.tournament_count(),
            connections: self.inner.connections.len(),
        }
    }

    fn connection(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.inner.connections.get(&user_id).map(|c| c.value().clone())
    }

    // --- sessions ---

    pub fn create_session(&self, user_id: UserId) -> Result<String, MatchmakingError> {
        let new = self.inner.registry.lock().create_session(user_id)?;
        let code = new.handle.code.clone();
        info!(user_id = %user_id, code = %code, "Session created");
        self.launch(new);
        Ok(code)
    }

    pub fn join_session(&self, code: &str, user_id: UserId) -> Result<(), MatchmakingError> {
        let code = normalize(code);
        let joined = self.inner.registry.lock().join_session(&code, user_id)?;
        if let JoinResult::Joined(handle) = joined {
            info!(user_id = %user_id, code = %code, "Joined session");
            handle.send(SessionCommand::PlayerJoined {
                user_id,
                connection: self.connection(user_id),
            });
        }
        Ok(())
    }

    /// Leave whatever game the user is in. Resolves once the registry has
    /// released the session. Tournament members leave their tournament.
    pub async fn leave_session(&self, user_id: UserId) {
        let target = {
            let registry = self.inner.registry.lock();
            let in_tournament = matches!(registry.membership(user_id), Some(Membership::Tournament(_)));
            if in_tournament {
                None
            } else {
                Some(registry.pending_leave(user_id))
            }
        };

        match target {
            None => self.leave_tournament(user_id).await,
            Some(pending) => self.leave_through(user_id, pending).await,
        }
    }

    pub fn assigned_code(&self, user_id: UserId) -> Result<String, MatchmakingError> {
        self.inner.registry.lock().assigned_code(user_id)
    }

    // --- tournaments ---

    pub fn create_tournament(&self, user_id: UserId) -> Result<String, MatchmakingError> {
        self.inner.registry.lock().create_tournament(user_id)
    }

    pub fn join_tournament(&self, code: &str, user_id: UserId) -> Result<(), MatchmakingError> {
        let code = normalize(code);
        let spawned = self.inner.registry.lock().join_tournament(&code, user_id)?;
        for new in spawned {
            self.launch(new);
        }
        Ok(())
    }

    pub async fn leave_tournament(&self, user_id: UserId) {
        let pending = self.inner.registry.lock().leave_tournament(user_id);
        self.leave_through(user_id, pending).await;
    }

    pub fn tournament(&self, code: &str) -> Result<Tournament, MatchmakingError> {
        self.inner.registry.lock().tournament(&normalize(code))
    }

    pub fn user_tournament(&self, user_id: UserId) -> Result<String, MatchmakingError> {
        self.inner.registry.lock().tournament_of(user_id)
    }

    /// Release every membership of a user. Never fails.
    pub async fn cleanup(&self, user_id: UserId) {
        self.leave_session(user_id).await;
        self.leave_tournament(user_id).await;
        info!(user_id = %user_id, "User cleaned up");
    }

    async fn leave_through(&self, user_id: UserId, pending: Option<Pending>) {
        let Some((handle, mut done)) = pending else {
            return;
        };
        handle.send(SessionCommand::Leave { user_id });
        if done.wait_for(|released| *released).await.is_err() {
            warn!(user_id = %user_id, code = %handle.code, "Session task ended without release");
        }
    }

    // --- connections ---

    /// Register a live socket and bind it to the user's session
    pub fn connect(&self, connection: ConnectionHandle) {
        let user_id = connection.user_id;
        if let Some(old) = self.inner.connections.insert(user_id, connection.clone()) {
            old.close(CLOSE_REPLACED, "replaced by a new connection");
        }

        let (handle, spawned) = {
            let mut registry = self.inner.registry.lock();
            let handle = registry.handle_for(user_id);
            let spawned = registry.resume_tournament(user_id);
            (handle, spawned)
        };
        if let Some(handle) = handle {
            handle.send(SessionCommand::Attach(connection));
        }
        for new in spawned {
            self.launch(new);
        }
    }

    pub fn disconnect(&self, user_id: UserId, connection_id: Uuid) {
        self.inner
            .connections
            .remove_if(&user_id, |_, c| c.id == connection_id);

        let handle = self.inner.registry.lock().handle_for(user_id);
        if let Some(handle) = handle {
            handle.send(SessionCommand::Detach {
                user_id,
                connection_id,
            });
        }
    }

    /// Forward a decoded client frame to the user's session
    pub fn route_input(&self, user_id: UserId, message: ClientMessage) {
        let handle = self.inner.registry.lock().handle_for(user_id);
        if let Some(handle) = handle {
            handle.send(SessionCommand::Input { user_id, message });
        }
    }

    // --- session tasks ---

    fn launch(&self, new: NewSession) {
        let NewSession {
            session,
            handle,
            done,
            players,
        } = new;

        for user_id in players {
            if let Some(connection) = self.connection(user_id) {
                handle.send(SessionCommand::Attach(connection));
            }
        }

        let this = self.clone();
        tokio::spawn(async move {
            let outcome = session.run().await;
            this.conclude(outcome);
            let _ = done.send(true);
        });
    }

    fn conclude(&self, outcome: MatchOutcome) {
        let conclusion = self.inner.registry.lock().conclude(&outcome);
        info!(code = %outcome.code, winner = ?outcome.winner(), "Session released");

        for new in conclusion.spawn {
            self.launch(new);
        }
        if let Some(record) = conclusion.record {
            self.persist(record);
        }
    }

    fn persist(&self, record: MatchRecord) {
        let history = self.inner.history.clone();
        tokio::spawn(async move {
            if let Err(e) = history.record(&record).await {
                warn!(error = %e, player1 = %record.player1_id, player2 = %record.player2_id, "Failed to persist match");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tournament::TournamentStatus;
    use crate::ws::connection::Outbound;
    use proptest::prelude::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    fn matchmaker() -> (Matchmaker, Arc<Mutex<Vec<MatchRecord>>>) {
        let (history, records) = MatchHistory::memory();
        (Matchmaker::new(GameConfig::default(), history), records)
    }

    fn connect(mm: &Matchmaker, user_id: UserId) -> (ConnectionHandle, mpsc::Receiver<Outbound>) {
        let (conn, rx) = ConnectionHandle::new(user_id);
        mm.connect(conn.clone());
        (conn, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn join_outcomes() {
        let (mm, _) = matchmaker();
        let code = mm.create_session(1).unwrap();

        assert_eq!(mm.join_session("ZZZZZZ", 2), Err(MatchmakingError::NotFound));
        assert_eq!(mm.join_session(&code.to_lowercase(), 2), Ok(()));
        assert_eq!(mm.join_session(&code, 2), Ok(()));
        assert_eq!(mm.join_session(&code, 3), Err(MatchmakingError::Forbidden));
        assert_eq!(mm.create_session(2), Err(MatchmakingError::Conflict));
        assert_eq!(mm.assigned_code(2), Ok(code));
        assert_eq!(mm.assigned_code(3), Err(MatchmakingError::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn leave_resolves_after_release() {
        let (mm, records) = matchmaker();
        let code = mm.create_session(1).unwrap();
        mm.join_session(&code, 2).unwrap();

        mm.leave_session(2).await;
        assert_eq!(mm.assigned_code(1), Err(MatchmakingError::NotFound));
        assert_eq!(mm.assigned_code(2), Err(MatchmakingError::NotFound));
        assert_eq!(mm.join_session(&code, 3), Err(MatchmakingError::NotFound));
        assert!(mm.create_session(1).is_ok());
        assert!(records.lock().is_empty());

        // Idempotent
        mm.leave_session(2).await;
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_frees_code() {
        let (mm, _) = matchmaker();
        let code = mm.create_session(1).unwrap();
        sleep(GameConfig::default().waiting_timeout + Duration::from_secs(1)).await;
        assert_eq!(mm.assigned_code(1), Err(MatchmakingError::NotFound));
        assert_eq!(mm.join_session(&code, 2), Err(MatchmakingError::NotFound));
        assert_eq!(mm.stats().active_sessions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn forfeit_is_persisted() {
        let (mm, records) = matchmaker();
        let (host, _host_rx) = connect(&mm, 1);
        let (_guest, _guest_rx) = connect(&mm, 2);

        let code = mm.create_session(1).unwrap();
        mm.join_session(&code, 2).unwrap();
        sleep(Duration::from_secs(6)).await;

        mm.disconnect(1, host.id);
        sleep(Duration::from_millis(50)).await;

        let records = records.lock();
        assert_eq!(records.len(), 1);
        assert_eq!((records[0].player1_id, records[0].player2_id), (1, 2));
        assert_eq!(records[0].tournament_id, None);
        assert_eq!(mm.assigned_code(2), Err(MatchmakingError::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_rebinds_session() {
        let (mm, _) = matchmaker();
        let (first, mut first_rx) = connect(&mm, 1);
        let code = mm.create_session(1).unwrap();

        let (_second, _second_rx) = connect(&mm, 1);
        // Old socket told to close; its late detach is ignored
        mm.disconnect(1, first.id);
        sleep(Duration::from_millis(10)).await;

        let mut closed = false;
        while let Ok(item) = first_rx.try_recv() {
            closed |= matches!(item, Outbound::Close { code: CLOSE_REPLACED, .. });
        }
        assert!(closed);
        assert_eq!(mm.assigned_code(1), Ok(code));
        assert_eq!(mm.stats().connections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tournament_plays_through_forfeits() {
        let (mm, records) = matchmaker();
        let mut conns = Vec::new();
        for user in 1..=4 {
            conns.push(connect(&mm, user));
        }

        let code = mm.create_tournament(1).unwrap();
        for user in 2..=4 {
            mm.join_tournament(&code, user).unwrap();
        }
        assert_eq!(mm.stats().active_sessions, 2);
        assert_eq!(mm.user_tournament(3), Ok(code.clone()));

        // Countdowns finish, then the second seat of each semifinal drops
        sleep(Duration::from_secs(6)).await;
        mm.disconnect(2, conns[1].0.id);
        mm.disconnect(4, conns[3].0.id);
        sleep(Duration::from_millis(50)).await;

        let t = mm.tournament(&code).unwrap();
        assert_eq!(t.matches[2].player1_id, Some(1));
        assert_eq!(t.matches[2].player2_id, Some(3));
        let final_code = mm.assigned_code(1).unwrap();
        assert_eq!(mm.assigned_code(3), Ok(final_code));

        sleep(Duration::from_secs(6)).await;
        mm.disconnect(3, conns[2].0.id);
        sleep(Duration::from_millis(50)).await;

        let t = mm.tournament(&code).unwrap();
        assert_eq!(t.status, TournamentStatus::Completed);
        assert_eq!(t.matches[2].winner, Some(1));

        let records = records.lock();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.tournament_id.as_deref() == Some(code.as_str())));
        assert_eq!(records[2].round, Some(2));
        drop(records);

        for user in 1..=4 {
            assert_eq!(mm.user_tournament(user), Err(MatchmakingError::NotFound));
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Create(UserId),
        Join(usize, UserId),
        Leave(UserId),
        CreateTournament(UserId),
        JoinTournament(usize, UserId),
        Cleanup(UserId),
        Connect(UserId),
        Wait(u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..6).prop_map(Op::Create),
            (0usize..6, 0u64..6).prop_map(|(i, u)| Op::Join(i, u)),
            (0u64..6).prop_map(Op::Leave),
            (0u64..6).prop_map(Op::CreateTournament),
            (0usize..4, 0u64..6).prop_map(|(i, u)| Op::JoinTournament(i, u)),
            (0u64..6).prop_map(Op::Cleanup),
            (0u64..6).prop_map(Op::Connect),
            (0u64..35).prop_map(Op::Wait),
        ]
    }

    /// Every user is in at most one place, and the code lookups agree with it
    fn assert_one_membership(mm: &Matchmaker) {
        let registry = mm.inner.registry.lock();
        for user in 0..6 {
            let assigned = registry.assigned_code(user);
            let session = registry.session_of(user);
            match registry.membership(user) {
                None => {
                    assert_eq!(assigned, Err(MatchmakingError::NotFound), "idle user {user} has a code");
                    assert!(session.is_none());
                }
                Some(Membership::Session(code)) => {
                    assert_eq!(assigned.as_ref(), Ok(code));
                    let entry = session.expect("busy user has a live session");
                    assert!(entry.bracket.is_none());
                    assert!(entry.player1 == user || entry.player2 == Some(user));
                }
                Some(Membership::Tournament(code)) => {
                    assert_eq!(registry.tournament_of(user).as_ref(), Ok(code));
                    if let Some(entry) = session {
                        let link = entry.bracket.as_ref().expect("tournament member in a free session");
                        assert_eq!(&link.tournament, code);
                    }
                }
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn users_never_hold_two_memberships(ops in prop::collection::vec(op(), 1..40)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .unwrap();

            runtime.block_on(async {
                let (mm, _) = matchmaker();
                let mut codes: Vec<String> = Vec::new();
                let mut tournaments: Vec<String> = Vec::new();
                let mut sockets = Vec::new();
                let limit = Duration::from_secs(120);

                for op in ops {
                    match op {
                        Op::Create(user) => codes.extend(mm.create_session(user).ok()),
                        Op::Join(i, user) => {
                            if let Some(code) = codes.get(i) {
                                let _ = mm.join_session(code, user);
                            }
                        }
                        Op::Leave(user) => {
                            timeout(limit, mm.leave_session(user)).await.expect("leave resolves");
                        }
                        Op::CreateTournament(user) => tournaments.extend(mm.create_tournament(user).ok()),
                        Op::JoinTournament(i, user) => {
                            if let Some(code) = tournaments.get(i) {
                                let _ = mm.join_tournament(code, user);
                            }
                        }
                        Op::Cleanup(user) => {
                            timeout(limit, mm.cleanup(user)).await.expect("cleanup resolves");
                        }
                        Op::Connect(user) => sockets.push(connect(&mm, user)),
                        Op::Wait(secs) => sleep(Duration::from_secs(secs)).await,
                    }
                    sleep(Duration::from_millis(5)).await;
                    assert_one_membership(&mm);
                }
            });
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_releases_everything() {
        let (mm, _) = matchmaker();
        let code = mm.create_tournament(1).unwrap();
        mm.join_tournament(&code, 2).unwrap();

        mm.cleanup(2).await;
        mm.cleanup(2).await;
        assert_eq!(mm.user_tournament(2), Err(MatchmakingError::NotFound));
        assert!(mm.create_session(2).is_ok());

        let t = mm.tournament(&code).unwrap();
        assert_eq!(t.participants[1], None);
        let session = mm.inner.registry.lock().handle_for(1);
        assert!(session.is_none());
        assert_ne!(t.status, TournamentStatus::Completed);
    }
}
