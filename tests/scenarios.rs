use puyo_duel::interrupt::distribute;
use puyo_duel::piece::Direction;
use puyo_duel::player::TickEnv;
use puyo_duel::protocol::{self, FrameReader, HEADER_LEN, Packet};
use puyo_duel::{BlockType, GameSettings, InputFrame, Phase, PlayerOrchestrator, Session};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn quick_settings() -> GameSettings {
    GameSettings {
        start_delay_ms: 0,
        ..GameSettings::default()
    }
}

fn init(player_id: u32) -> Packet {
    Packet::InitializeGame(protocol::InitializeGame {
        player_id,
        map_id: 0,
        character_id: 0,
        block1: [BlockType::Purple, BlockType::Yellow],
        block2: [BlockType::Green, BlockType::Red],
    })
}

#[test]
fn four_in_a_row_shatters_as_one_group() {
    let settings = GameSettings::default();
    let mut rng = StdRng::seed_from_u64(1);
    let mut env = TickEnv {
        settings: &settings,
        elapsed_ms: 0,
        rng: &mut rng,
    };
    let mut player = PlayerOrchestrator::local(1);
    player.begin([[BlockType::Red, BlockType::Red]; 2]);
    for x in 0..4 {
        player.board_mut().place_stationary(BlockType::Blue, x, 12);
    }

    assert!(player.check_game_block_state(&mut env));
    assert_eq!(player.phase(), Phase::Shattering);
    let groups = &player.last_match().groups;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].link_count(), 4);
    assert_eq!(groups[0].kind, BlockType::Blue);
}

#[test]
fn thirty_owed_blocks_fill_five_rows() {
    let settings = GameSettings::default();
    let mut rng = StdRng::seed_from_u64(2);
    let placement = distribute(30, &mut rng).unwrap();
    assert_eq!(placement.rows, 5);
    assert!(placement.columns.is_empty());

    let mut env = TickEnv {
        settings: &settings,
        elapsed_ms: 0,
        rng: &mut rng,
    };
    let mut player = PlayerOrchestrator::local(1);
    player.begin([[BlockType::Red, BlockType::Green]; 2]);
    player.interrupts_mut().add(30);
    player.check_game_block_state(&mut env);
    assert_eq!(player.phase(), Phase::IceBlocking);
    assert_eq!(player.interrupts().pending, 0);

    let idle = Default::default();
    for _ in 0..1000 {
        if player.phase() != Phase::IceBlocking {
            break;
        }
        player.tick(&idle, &mut env);
    }
    assert_eq!(player.phase(), Phase::Playing);
    let digits = player.board().digits();
    for row in &digits[8..] {
        assert_eq!(row, &vec![6; 6]);
    }
    assert!(digits[..8].iter().flatten().all(|&d| d == 0));
}

#[test]
fn remote_move_left_shifts_only_that_mirror() {
    let mut session = Session::new(quick_settings(), 1, Some(4));
    session.initialize(0, 0);
    session.tick(16.0);
    session.drain_outbound();
    let local_before = session.local().board().digits();
    let local_piece_x = session.local().piece().map(|p| p.standard().x);

    for packet in [
        init(2),
        Packet::ChangeBlockState(protocol::ChangeBlockState {
            player_id: 2,
            phase: Phase::Playing,
        }),
    ] {
        session.receive(&packet.encode());
    }
    session.tick(16.0);
    let before = session.mirrors().get(2).unwrap().piece().unwrap().standard().x;

    session.receive(
        &Packet::Move(protocol::Move {
            player_id: 2,
            direction: Direction::Left,
            position: (before - 1) as f32,
        })
        .encode(),
    );
    session.tick(16.0);

    let mirror = session.mirrors().get(2).unwrap();
    assert_eq!(mirror.piece().unwrap().standard().x, before - 1);
    assert_eq!(session.local().board().digits(), local_before);
    assert_eq!(
        session.local().piece().map(|p| p.standard().x),
        local_piece_x
    );
}

#[test]
fn oversized_declaration_waits_for_more_bytes() {
    let mut session = Session::new(quick_settings(), 1, Some(5));
    let frame = init(2).encode();
    session.receive(&frame[..frame.len() - 3]);
    assert_eq!(session.pump_inbound(), 0);
    assert!(session.mirrors().is_empty());
    session.receive(&frame[frame.len() - 3..]);
    assert_eq!(session.pump_inbound(), 1);
    assert!(session.mirrors().get(2).is_some());

    let mut reader = FrameReader::new();
    let mut header = Vec::new();
    header.extend_from_slice(&200u32.to_le_bytes());
    header.extend_from_slice(&14u16.to_le_bytes());
    header.extend_from_slice(&[2, 0, 0, 0]);
    reader.extend(&header);
    assert!(reader.next_frame().is_none());
    assert_eq!(reader.buffered(), HEADER_LEN + 4);
}

#[test]
fn mirror_converges_with_its_authority() {
    let mut authority = Session::new(quick_settings(), 1, Some(21));
    let mut observer = Session::new(quick_settings(), 2, Some(22));
    authority.initialize(3, 1);

    for _ in 0..100_000 {
        if authority.outcome().is_some() {
            break;
        }
        authority.tick(16.0);
        for frame in authority.drain_outbound() {
            observer.receive(&frame);
        }
        observer.tick(16.0);
    }
    assert_eq!(authority.outcome(), Some(false));
    for _ in 0..500 {
        observer.tick(16.0);
    }

    let mirror = observer.mirrors().get(1).unwrap();
    assert_eq!(mirror.phase(), Phase::GameOver);
    assert_eq!(mirror.profile(), (3, 1));
    assert_eq!(mirror.board().digits(), authority.local().board().digits());
    assert_eq!(mirror.score().score, authority.local().score().score);
}

/// Packet kinds seen on the wire during a duel.
#[derive(Debug, Default)]
struct Traffic {
    rotates: usize,
    splits: usize,
    drops: usize,
    ice: usize,
    attacks: usize,
}

impl Traffic {
    fn record(&mut self, packet: &Packet) {
        match packet {
            Packet::Rotate(_) => self.rotates += 1,
            Packet::FallingBlock(_) => self.splits += 1,
            Packet::Move(m) if m.direction == Direction::Bottom => self.drops += 1,
            Packet::AddInterruptBlock(_) => self.ice += 1,
            Packet::AttackInterrupt(_) => self.attacks += 1,
            _ => {}
        }
    }
}

/// Deliver everything `from` queued to `to`, counting what went by.
fn exchange(from: &mut Session, to: &mut Session, traffic: &mut Traffic) {
    let mut reader = FrameReader::new();
    for frame in from.drain_outbound() {
        to.receive(&frame);
        reader.extend(&frame);
    }
    for frame in reader.drain() {
        traffic.record(&frame.decode().unwrap());
    }
}

fn random_input(rng: &mut StdRng) -> InputFrame {
    InputFrame {
        left: rng.gen_bool(0.15),
        right: rng.gen_bool(0.15),
        soft_drop: rng.gen_bool(0.6),
        rotate: rng.gen_bool(0.2),
        quit: false,
    }
}

fn mirror_of(observer: &Session, id: u32) -> &PlayerOrchestrator {
    observer.mirrors().get(id).unwrap()
}

/// Both copies hold a fresh piece and the mirror has nothing left to replay, so the
/// placed blocks must agree.
fn comparable(authority: &Session, observer: &Session) -> bool {
    let local = authority.local();
    let Some(mirror) = observer.mirrors().get(local.id()) else {
        return false;
    };
    local.phase() == Phase::Playing
        && local.piece().is_some()
        && mirror.phase() == Phase::Playing
        && mirror.piece().is_some()
        && mirror.pending_events() == 0
}

fn assert_mirrored(authority: &Session, observer: &Session, context: &str) {
    let local = authority.local();
    let mirror = mirror_of(observer, local.id());
    assert_eq!(mirror.board().digits(), local.board().digits(), "{context}");
    assert_eq!(mirror.score().score, local.score().score, "{context}");
}

fn all_settled(a: &Session, b: &Session) -> bool {
    [(a, b), (b, a)].iter().all(|(auth, obs)| {
        let mirror = mirror_of(obs, auth.local().id());
        auth.local().is_settled() && mirror.is_settled() && mirror.pending_events() == 0
    })
}

#[test]
fn random_duels_keep_mirrors_in_step() {
    let settings = GameSettings {
        color_count: 3,
        ..quick_settings()
    };
    let mut traffic = Traffic::default();
    for seed in 1..=6u64 {
        let mut a = Session::new(settings.clone(), 1, Some(seed * 2));
        let mut b = Session::new(settings.clone(), 2, Some(seed * 2 + 1));
        let mut keys = StdRng::seed_from_u64(seed);
        a.initialize(0, 0);
        b.initialize(1, 0);
        exchange(&mut a, &mut b, &mut traffic);
        exchange(&mut b, &mut a, &mut traffic);

        let mut tick = 0;
        while (a.outcome().is_none() || b.outcome().is_none()) && tick < 100_000 {
            a.set_input(random_input(&mut keys));
            b.set_input(random_input(&mut keys));
            a.tick(16.0);
            b.tick(16.0);
            if comparable(&a, &b) {
                assert_mirrored(&a, &b, &format!("seed {seed} tick {tick}: b's copy of a"));
            }
            if comparable(&b, &a) {
                assert_mirrored(&b, &a, &format!("seed {seed} tick {tick}: a's copy of b"));
            }
            exchange(&mut a, &mut b, &mut traffic);
            exchange(&mut b, &mut a, &mut traffic);
            tick += 1;
        }
        assert!(a.outcome().is_some() && b.outcome().is_some(), "seed {seed} never ended");

        for _ in 0..3000 {
            if all_settled(&a, &b) {
                break;
            }
            a.tick(16.0);
            b.tick(16.0);
            exchange(&mut a, &mut b, &mut traffic);
            exchange(&mut b, &mut a, &mut traffic);
        }
        assert!(all_settled(&a, &b), "seed {seed} never settled");
        assert_mirrored(&a, &b, &format!("seed {seed} end: b's copy of a"));
        assert_mirrored(&b, &a, &format!("seed {seed} end: a's copy of b"));
    }

    assert!(traffic.rotates > 0, "{traffic:?}");
    assert!(traffic.splits > 0, "{traffic:?}");
    assert!(traffic.drops > 0, "{traffic:?}");
    assert!(traffic.attacks > 0, "{traffic:?}");
    assert!(traffic.ice > 0, "{traffic:?}");
}

#[test]
fn owed_ice_lands_on_the_mirror_too() {
    let mut a = Session::new(quick_settings(), 1, Some(31));
    let mut b = Session::new(quick_settings(), 2, Some(32));
    let mut traffic = Traffic::default();
    a.initialize(0, 0);
    a.local_mut().interrupts_mut().add(8);
    a.set_input(InputFrame {
        soft_drop: true,
        ..InputFrame::default()
    });

    let ice_cells = |s: &PlayerOrchestrator| {
        s.board().digits().iter().flatten().filter(|&&d| d == 6).count()
    };
    for _ in 0..5000 {
        a.tick(16.0);
        b.tick(16.0);
        exchange(&mut a, &mut b, &mut traffic);
        if ice_cells(a.local()) == 8 && comparable(&a, &b) {
            break;
        }
    }

    assert_eq!(traffic.ice, 1);
    assert_eq!(a.local().interrupts().pending, 0);
    assert!(comparable(&a, &b));
    assert_eq!(ice_cells(mirror_of(&b, 1)), 8);
    assert_mirrored(&a, &b, "after the ice drop");
}
