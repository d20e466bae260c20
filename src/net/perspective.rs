//! Host world frame to client view.
//!
//! The host simulates in one shared coordinate space where its own entity lives on the
//! positive-Z half. The client mirrors every snapshot through the court centre and swaps
//! roles so that it always sees itself as the near-side `player`.

use crate::game::entity::Side;
use crate::game::events::GameEvent;
use crate::game::snapshot::{BallSnapshot, EntitySnapshot, MatchSnapshot, Snapshot};

/// Mirror a snapshot into the other side's view. Applying it twice is the identity.
pub fn invert(snapshot: &Snapshot) -> Snapshot {
    Snapshot {
        tick: snapshot.tick,
        player: mirror_entity(&snapshot.opponent),
        opponent: mirror_entity(&snapshot.player),
        balls: snapshot.balls.iter().map(mirror_ball).collect(),
        events: snapshot.events.iter().map(mirror_event).collect(),
        game: swap_sides(&snapshot.game),
    }
}

fn mirror_entity(e: &EntitySnapshot) -> EntitySnapshot {
    EntitySnapshot {
        x: -e.x,
        z: -e.z,
        ..e.clone()
    }
}

fn mirror_ball(b: &BallSnapshot) -> BallSnapshot {
    BallSnapshot {
        x: -b.x,
        z: -b.z,
        owner: b.owner.map(Side::other),
        ..b.clone()
    }
}

fn mirror_event(ev: &GameEvent) -> GameEvent {
    GameEvent {
        x: -ev.x,
        z: -ev.z,
        side: ev.side.map(Side::other),
        ..ev.clone()
    }
}

fn swap_sides(game: &MatchSnapshot) -> MatchSnapshot {
    MatchSnapshot {
        player_score: game.opponent_score,
        opponent_score: game.player_score,
        player_lives: game.opponent_lives,
        opponent_lives: game.player_lives,
        winner: game.winner.map(Side::other),
        ..game.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::EventKind;
    use crate::game::{Engine, InputHandle, Vec2};

    fn busy_snapshot() -> Snapshot {
        let mut engine = Engine::new(11);
        engine.start_game();
        let input = InputHandle::new();
        input.set_joystick(Vec2::new(0.6, -0.4));
        for _ in 0..240 {
            engine.frame(1.0 / 60.0, &input);
        }
        let mut snap = engine.view();
        snap.game.player_score = 1;
        snap.game.opponent_lives = 2;
        snap.game.winner = Some(Side::Player);
        snap.events.push(GameEvent {
            id: 99,
            kind: EventKind::Hit,
            x: 1.5,
            z: -4.0,
            text: Some("BONK!".into()),
            side: Some(Side::Opponent),
            time: 0,
        });
        snap
    }

    #[test]
    fn inversion_is_self_inverse() {
        let snap = busy_snapshot();
        assert_eq!(invert(&invert(&snap)), snap);
    }

    #[test]
    fn client_sees_itself_where_the_host_sees_its_own_player() {
        let snap = busy_snapshot();
        let view = invert(&snap);

        // Host's opponent is the client's own entity, mirrored onto the near half.
        assert_eq!(view.player.x, -snap.opponent.x);
        assert_eq!(view.player.z, -snap.opponent.z);
        assert!(view.player.z >= 0.0);
        assert!(view.opponent.z <= 0.0);
    }

    #[test]
    fn ownership_and_scores_swap_with_roles() {
        let snap = busy_snapshot();
        let view = invert(&snap);

        assert_eq!(view.game.opponent_score, 1);
        assert_eq!(view.game.player_lives, 2);
        assert_eq!(view.game.winner, Some(Side::Opponent));
        assert_eq!(view.game.phase, snap.game.phase);

        let event = view.events.iter().find(|e| e.id == 99).unwrap();
        assert_eq!(event.side, Some(Side::Player));
        assert_eq!((event.x, event.z), (-1.5, 4.0));

        for (before, after) in snap.balls.iter().zip(&view.balls) {
            assert_eq!(after.id, before.id);
            assert_eq!(after.y, before.y);
            assert_eq!(after.owner, before.owner.map(Side::other));
        }
        assert!(view.validate().is_ok());
    }
}
