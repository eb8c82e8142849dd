//! Unit tests for roundbox-prog
//!
//! These cover the pure pieces: payout arithmetic, commit-reveal
//! verification, the instruction codec and record layouts. Processor-level
//! flows live in the library's inline test module.

use num_traits::FromPrimitive;
use solana_program::program_error::ProgramError;

use roundbox_prog::constants::{DEPOSIT_LEN, GAME_STATE_LEN, ROUND_LEN, VAULT_LEN};
use roundbox_prog::error::RoundBoxError;
use roundbox_prog::ix::Instruction;
use roundbox_prog::payout;
use roundbox_prog::reveal;
use roundbox_prog::state::{self, Round, RoundStatus};

// --- payout math ---

#[test]
fn settle_split_conserves_pool() {
    for pool in [0u64, 1, 3, 1003, 10_000, 1_000_000_000_000_000] {
        let split = payout::settle_split(pool).unwrap();
        // Shares never exceed the pool even with the full allowance claimed.
        let spent = split.winner + split.evidence_cap + split.treasury;
        assert!(spent <= pool, "pool {}", pool);
        let residual = payout::settle_residual(pool, &split, split.evidence_cap).unwrap();
        assert_eq!(split.winner + split.evidence_cap + split.treasury + residual, pool);
    }
}

#[test]
fn settle_split_known_values() {
    let split = payout::settle_split(10_000).unwrap();
    assert_eq!(split.winner, 5_000);
    assert_eq!(split.treasury, 500);
    assert_eq!(split.evidence_cap, 3_000);

    // Sub-denominator pools floor every share to zero.
    let split = payout::settle_split(1).unwrap();
    assert_eq!((split.winner, split.treasury, split.evidence_cap), (0, 0, 0));
    assert_eq!(payout::settle_residual(1, &split, 0).unwrap(), 1);
}

#[test]
fn expire_split_conserves_deposits() {
    for total in [0u64, 1, 3, 1003, 10_000, 999_999_937, 1_000_000_000_000_000] {
        let split = payout::expire_split(total).unwrap();
        assert_eq!(split.buyback + split.treasury + split.rollover_added, total);
    }
}

#[test]
fn expire_split_known_values() {
    let split = payout::expire_split(1003).unwrap();
    assert_eq!(split.buyback, 476);
    assert_eq!(split.treasury, 50);
    assert_eq!(split.rollover_added, 477);
}

#[test]
fn share_overflow_is_reported() {
    assert_eq!(payout::settle_split(u64::MAX), Err(RoundBoxError::MathOverflow));
    assert_eq!(payout::expire_split(u64::MAX), Err(RoundBoxError::MathOverflow));
    assert_eq!(
        payout::evidence_total(&[u64::MAX, 1]),
        Err(RoundBoxError::MathOverflow)
    );
}

#[test]
fn evidence_total_sums() {
    assert_eq!(payout::evidence_total(&[]).unwrap(), 0);
    assert_eq!(payout::evidence_total(&[5, 0, 7]).unwrap(), 12);
}

// --- commit-reveal ---

#[test]
fn reveal_verifies_against_commitment() {
    let commit = reveal::commitment(b"answer", b"salt");
    assert!(reveal::verify(b"answer", b"salt", &commit).is_ok());

    assert_eq!(
        reveal::verify(b"other", b"salt", &commit),
        Err(RoundBoxError::InvalidCommitHash.into())
    );
    assert_eq!(
        reveal::verify(b"answer", b"other", &commit),
        Err(RoundBoxError::InvalidCommitHash.into())
    );
}

#[test]
fn reveal_separator_prevents_boundary_shifts() {
    // "ab" + "c" and "a" + "bc" must not collide.
    assert_ne!(reveal::commitment(b"ab", b"c"), reveal::commitment(b"a", b"bc"));
}

#[test]
fn reveal_rejects_oversized_inputs() {
    let long = [b'x'; 65];
    let commit = reveal::commitment(b"a", b"b");
    assert_eq!(
        reveal::verify(&long, b"b", &commit),
        Err(RoundBoxError::AnswerTooLong.into())
    );
    assert_eq!(
        reveal::verify(b"a", &long, &commit),
        Err(RoundBoxError::SaltTooLong.into())
    );
    // 64 bytes is still legal.
    let max = [b'x'; 64];
    let commit = reveal::commitment(&max, &max);
    assert!(reveal::verify(&max, &max, &commit).is_ok());
}

// --- instruction codec ---

#[test]
fn decode_create_round() {
    let mut data = vec![1u8];
    data.extend_from_slice(&7u64.to_le_bytes());
    data.extend_from_slice(&[0xaa; 32]);
    data.extend_from_slice(&(-5i64).to_le_bytes());

    match Instruction::decode(&data).unwrap() {
        Instruction::CreateRound { round_id, commit_hash, ends_at } => {
            assert_eq!(round_id, 7);
            assert_eq!(commit_hash, [0xaa; 32]);
            assert_eq!(ends_at, -5);
        }
        other => panic!("wrong variant: {:?}", other),
    }
}

#[test]
fn decode_settle_with_evidence() {
    let mut data = vec![3u8];
    data.extend_from_slice(&3u16.to_le_bytes());
    data.extend_from_slice(b"abc");
    data.extend_from_slice(&2u16.to_le_bytes());
    data.extend_from_slice(b"xy");
    data.extend_from_slice(&2u16.to_le_bytes());
    data.extend_from_slice(&100u64.to_le_bytes());
    data.extend_from_slice(&200u64.to_le_bytes());

    match Instruction::decode(&data).unwrap() {
        Instruction::Settle { answer, salt, evidence_amounts } => {
            assert_eq!(answer, b"abc");
            assert_eq!(salt, b"xy");
            assert_eq!(evidence_amounts, vec![100, 200]);
        }
        other => panic!("wrong variant: {:?}", other),
    }
}

#[test]
fn decode_rejects_malformed_input() {
    assert!(Instruction::decode(&[]).is_err());
    assert!(Instruction::decode(&[99]).is_err());
    // Deposit with a truncated amount.
    assert!(Instruction::decode(&[2, 1, 2, 3]).is_err());
    // Settle whose declared answer length exceeds the payload.
    let mut data = vec![3u8];
    data.extend_from_slice(&10u16.to_le_bytes());
    data.extend_from_slice(b"abc");
    assert!(Instruction::decode(&data).is_err());
}

#[test]
fn decode_tag_only_instructions() {
    assert!(matches!(Instruction::decode(&[5]).unwrap(), Instruction::EmergencyExpire));
    assert!(matches!(Instruction::decode(&[6]).unwrap(), Instruction::CloseRound));
    assert!(matches!(Instruction::decode(&[7]).unwrap(), Instruction::CloseDeposit));
}

// --- record layouts ---

#[test]
fn record_sizes_are_stable() {
    assert_eq!(GAME_STATE_LEN, 128);
    assert_eq!(ROUND_LEN, 200);
    assert_eq!(DEPOSIT_LEN, 48);
    assert_eq!(VAULT_LEN, 8);
}

#[test]
fn round_round_trips_through_bytes() {
    let mut round = Round {
        round_id: 42,
        ends_at: 1_700_000_000,
        total_deposits: 5_000,
        rollover_in: 123,
        commit_hash: [7; 32],
        revealed_answer: [0; 64],
        revealed_salt: [0; 64],
        status: RoundStatus::Active as u8,
        answer_len: 0,
        salt_len: 0,
        _padding: [0; 5],
    };
    round.record_reveal(b"answer", b"salt");

    let mut buf = vec![0u8; ROUND_LEN];
    state::write_round(&mut buf, &round);
    let decoded = state::read_round(&buf).unwrap();

    assert_eq!(decoded.round_id, 42);
    assert_eq!(decoded.revealed_answer(), b"answer");
    assert_eq!(decoded.revealed_salt(), b"salt");
    assert_eq!(decoded.status().unwrap(), RoundStatus::Active);
}

#[test]
fn round_status_rejects_unknown_discriminants() {
    assert!(RoundStatus::try_from(0).is_err());
    assert!(RoundStatus::try_from(4).is_err());
    assert_eq!(RoundStatus::try_from(2).unwrap(), RoundStatus::Settled);
}

#[test]
fn short_buffers_are_rejected() {
    assert!(state::read_round(&[0u8; 10]).is_err());
    assert!(state::read_game_state(&[0u8; 10]).is_err());
    assert!(state::read_deposit(&[0u8; 10]).is_err());
}

// --- error codes ---

#[test]
fn error_codes_round_trip() {
    for (code, err) in [
        (0u32, RoundBoxError::Unauthorized),
        (3, RoundBoxError::InvalidCommitHash),
        (4, RoundBoxError::InvalidPayoutSum),
        (11, RoundBoxError::GracePeriodNotElapsed),
    ] {
        assert_eq!(RoundBoxError::from_u32(code), Some(err));
        assert_eq!(ProgramError::from(err), ProgramError::Custom(code));
    }
    assert_eq!(RoundBoxError::from_u32(999), None);
}
