//! RoundBox: single-file Solana program for round-based pooled-fund settlement.
//!
//! Participants deposit lamports into a time-boxed round. The round resolves
//! exactly once: a commit-reveal `settle` pays a winner, the treasury and
//! discretionary evidence wallets, or an `expire` path splits raw deposits
//! between a buyback wallet and the treasury. Either way the unconsumed
//! remainder carries forward through the registry rollover balance.

#![no_std]
#![deny(unsafe_code)]

extern crate alloc;

#[cfg(not(feature = "no-entrypoint"))]
solana_security_txt::security_txt! {
    name: "RoundBox",
    project_url: "https://github.com/roundbox-labs/roundbox-prog",
    contacts: "email:security@roundbox.bet",
    policy: "https://github.com/roundbox-labs/roundbox-prog/blob/master/SECURITY.md"
}

// 1. mod constants
pub mod constants {
    use core::mem::size_of;
    use crate::state::{Deposit, GameState, Round, Vault};

    pub const MAGIC: u64 = 0x524f554e44424f58; // "ROUNDBOX"
    pub const VERSION: u32 = 1;

    pub const GAME_STATE_SEED: &[u8] = b"game_state";
    pub const VAULT_SEED: &[u8] = b"vault";
    pub const ROUND_SEED: &[u8] = b"round";
    pub const DEPOSIT_SEED: &[u8] = b"deposit";

    // Payout shares in basis points. Settle distributes at most 85% of the
    // pool (50 + 30 + 5); expire distributes 52.5% of raw deposits.
    pub const BPS_DENOM: u64 = 10_000;
    pub const WINNER_BPS: u64 = 5_000;
    pub const EVIDENCE_CAP_BPS: u64 = 3_000;
    pub const TREASURY_BPS: u64 = 500;
    pub const BUYBACK_BPS: u64 = 4_750;

    /// Seconds past `ends_at` before the permissionless expiry opens.
    pub const GRACE_PERIOD_SECS: i64 = 86_400;
    /// Upper bound on revealed answer and salt, in bytes.
    pub const MAX_REVEAL_LEN: usize = 64;

    pub const GAME_STATE_LEN: usize = size_of::<GameState>();
    pub const ROUND_LEN: usize = size_of::<Round>();
    pub const DEPOSIT_LEN: usize = size_of::<Deposit>();
    pub const VAULT_LEN: usize = size_of::<Vault>();
}

// 2. mod error
pub mod error {
    use num_derive::FromPrimitive;
    use solana_program::{decode_error::DecodeError, program_error::ProgramError};

    #[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
    pub enum RoundBoxError {
        /// Caller is not the authority, or a payout account does not match
        /// the registry.
        Unauthorized,
        RoundNotActive,
        RoundStillActive,
        /// SHA-256 of `answer ++ ":" ++ salt` differs from the commitment.
        InvalidCommitHash,
        /// Evidence amounts exceed the 30% pool allowance.
        InvalidPayoutSum,
        MathOverflow,
        AnswerTooLong,
        SaltTooLong,
        /// Evidence wallet count differs from evidence amount count.
        EvidenceMismatch,
        /// Round id is not `current_round_id + 1`.
        InvalidRoundId,
        /// `ends_at` is not strictly in the future.
        InvalidEndTime,
        GracePeriodNotElapsed,
        AlreadyInitialized,
        NotInitialized,
    }

    impl From<RoundBoxError> for ProgramError {
        fn from(e: RoundBoxError) -> Self {
            ProgramError::Custom(e as u32)
        }
    }

    impl<T> DecodeError<T> for RoundBoxError {
        fn type_of() -> &'static str {
            "RoundBoxError"
        }
    }
}

// 3. mod ix
pub mod ix {
    use alloc::vec::Vec;
    use arrayref::array_ref;
    use solana_program::{program_error::ProgramError, pubkey::Pubkey};

    /// Wire format: a one-byte tag followed by little-endian fields.
    /// Variable-length fields carry a u16 length (or count) prefix.
    ///
    /// Expected accounts per instruction:
    /// - `Initialize`:       [payer s, game_state w, vault w]
    /// - `CreateRound`:      [authority s, game_state w, round w, clock]
    /// - `Deposit`:          [depositor s+w, round w, deposit w, vault w, system]
    /// - `Settle`:           [authority s, game_state w, round w, vault w,
    ///                        winner w, treasury w, evidence wallets... w]
    /// - `Expire`:           [authority s, game_state w, round w, vault w,
    ///                        treasury w, buyback w]
    /// - `EmergencyExpire`:  [caller s, game_state w, round w, vault w,
    ///                        treasury w, buyback w, clock]
    /// - `CloseRound`:       [authority s+w, game_state, round w]
    /// - `CloseDeposit`:     [authority s+w, game_state, round, deposit w]
    #[derive(Debug)]
    pub enum Instruction {
        Initialize { treasury: Pubkey, buyback_wallet: Pubkey },
        CreateRound { round_id: u64, commit_hash: [u8; 32], ends_at: i64 },
        Deposit { amount: u64 },
        Settle { answer: Vec<u8>, salt: Vec<u8>, evidence_amounts: Vec<u64> },
        Expire { answer: Vec<u8>, salt: Vec<u8> },
        EmergencyExpire,
        CloseRound,
        CloseDeposit,
    }

    impl Instruction {
        pub fn decode(input: &[u8]) -> Result<Self, ProgramError> {
            let (&tag, mut rest) = input
                .split_first()
                .ok_or(ProgramError::InvalidInstructionData)?;

            match tag {
                0 => {
                    let treasury = read_pubkey(&mut rest)?;
                    let buyback_wallet = read_pubkey(&mut rest)?;
                    Ok(Instruction::Initialize { treasury, buyback_wallet })
                }
                1 => {
                    let round_id = read_u64(&mut rest)?;
                    let commit_hash = read_hash(&mut rest)?;
                    let ends_at = read_i64(&mut rest)?;
                    Ok(Instruction::CreateRound { round_id, commit_hash, ends_at })
                }
                2 => {
                    let amount = read_u64(&mut rest)?;
                    Ok(Instruction::Deposit { amount })
                }
                3 => {
                    let answer = read_bytes(&mut rest)?;
                    let salt = read_bytes(&mut rest)?;
                    let evidence_amounts = read_u64_vec(&mut rest)?;
                    Ok(Instruction::Settle { answer, salt, evidence_amounts })
                }
                4 => {
                    let answer = read_bytes(&mut rest)?;
                    let salt = read_bytes(&mut rest)?;
                    Ok(Instruction::Expire { answer, salt })
                }
                5 => Ok(Instruction::EmergencyExpire),
                6 => Ok(Instruction::CloseRound),
                7 => Ok(Instruction::CloseDeposit),
                _ => Err(ProgramError::InvalidInstructionData),
            }
        }
    }

    fn read_u16(input: &mut &[u8]) -> Result<u16, ProgramError> {
        if input.len() < 2 {
            return Err(ProgramError::InvalidInstructionData);
        }
        let (bytes, rest) = input.split_at(2);
        *input = rest;
        Ok(u16::from_le_bytes(*array_ref![bytes, 0, 2]))
    }

    fn read_u64(input: &mut &[u8]) -> Result<u64, ProgramError> {
        if input.len() < 8 {
            return Err(ProgramError::InvalidInstructionData);
        }
        let (bytes, rest) = input.split_at(8);
        *input = rest;
        Ok(u64::from_le_bytes(*array_ref![bytes, 0, 8]))
    }

    fn read_i64(input: &mut &[u8]) -> Result<i64, ProgramError> {
        if input.len() < 8 {
            return Err(ProgramError::InvalidInstructionData);
        }
        let (bytes, rest) = input.split_at(8);
        *input = rest;
        Ok(i64::from_le_bytes(*array_ref![bytes, 0, 8]))
    }

    fn read_hash(input: &mut &[u8]) -> Result<[u8; 32], ProgramError> {
        if input.len() < 32 {
            return Err(ProgramError::InvalidInstructionData);
        }
        let (bytes, rest) = input.split_at(32);
        *input = rest;
        Ok(*array_ref![bytes, 0, 32])
    }

    fn read_pubkey(input: &mut &[u8]) -> Result<Pubkey, ProgramError> {
        if input.len() < 32 {
            return Err(ProgramError::InvalidInstructionData);
        }
        let (bytes, rest) = input.split_at(32);
        *input = rest;
        Ok(Pubkey::new_from_array(*array_ref![bytes, 0, 32]))
    }

    // Length checks only; the ≤64-byte reveal bound is enforced by the
    // processor so oversized inputs fail with AnswerTooLong / SaltTooLong.
    fn read_bytes(input: &mut &[u8]) -> Result<Vec<u8>, ProgramError> {
        let len = read_u16(input)? as usize;
        if input.len() < len {
            return Err(ProgramError::InvalidInstructionData);
        }
        let (bytes, rest) = input.split_at(len);
        *input = rest;
        Ok(bytes.to_vec())
    }

    fn read_u64_vec(input: &mut &[u8]) -> Result<Vec<u64>, ProgramError> {
        let count = read_u16(input)? as usize;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(read_u64(input)?);
        }
        Ok(out)
    }
}

// 4. mod accounts
pub mod accounts {
    use solana_program::{
        account_info::AccountInfo, program_error::ProgramError, pubkey::Pubkey,
    };
    use crate::constants::{DEPOSIT_SEED, GAME_STATE_SEED, ROUND_SEED, VAULT_SEED};

    pub fn expect_len(accounts: &[AccountInfo], n: usize) -> Result<(), ProgramError> {
        if accounts.len() < n {
            return Err(ProgramError::NotEnoughAccountKeys);
        }
        Ok(())
    }

    pub fn expect_signer(ai: &AccountInfo) -> Result<(), ProgramError> {
        if !ai.is_signer {
            return Err(ProgramError::MissingRequiredSignature);
        }
        Ok(())
    }

    pub fn expect_writable(ai: &AccountInfo) -> Result<(), ProgramError> {
        if !ai.is_writable {
            return Err(ProgramError::InvalidAccountData);
        }
        Ok(())
    }

    pub fn expect_owner(ai: &AccountInfo, owner: &Pubkey) -> Result<(), ProgramError> {
        if ai.owner != owner {
            return Err(ProgramError::IllegalOwner);
        }
        Ok(())
    }

    pub fn expect_key(ai: &AccountInfo, expected: &Pubkey) -> Result<(), ProgramError> {
        if ai.key != expected {
            return Err(ProgramError::InvalidArgument);
        }
        Ok(())
    }

    // Every record is addressed by a PDA derived from its identifying
    // fields, so any caller can locate it without a separate index.

    pub fn derive_game_state(program_id: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[GAME_STATE_SEED], program_id)
    }

    pub fn derive_vault(program_id: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[VAULT_SEED], program_id)
    }

    pub fn derive_round(program_id: &Pubkey, round_id: u64) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[ROUND_SEED, &round_id.to_le_bytes()], program_id)
    }

    pub fn derive_deposit(program_id: &Pubkey, round_id: u64, user: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(
            &[DEPOSIT_SEED, &round_id.to_le_bytes(), user.as_ref()],
            program_id,
        )
    }
}

// 5. mod state
pub mod state {
    use bytemuck::{Pod, Zeroable};
    use solana_program::program_error::ProgramError;
    use crate::constants::{DEPOSIT_LEN, GAME_STATE_LEN, ROUND_LEN, VAULT_LEN};

    /// Singleton registry. `magic` doubles as the initialization marker.
    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct GameState {
        pub magic: u64,
        pub version: u32,
        pub _padding: u32,
        pub authority: [u8; 32],
        pub treasury: [u8; 32],
        pub buyback_wallet: [u8; 32],
        /// Count of rounds ever created; ids are dense starting at 1.
        pub current_round_id: u64,
        /// Carry-forward balance: overwritten by settle, added to by expire.
        pub rollover_balance: u64,
    }

    /// Closed three-state lifecycle; Active is the only non-terminal state.
    #[repr(u8)]
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub enum RoundStatus {
        Active = 1,
        Settled = 2,
        Expired = 3,
    }

    impl TryFrom<u8> for RoundStatus {
        type Error = ProgramError;

        fn try_from(v: u8) -> Result<Self, Self::Error> {
            match v {
                1 => Ok(RoundStatus::Active),
                2 => Ok(RoundStatus::Settled),
                3 => Ok(RoundStatus::Expired),
                _ => Err(ProgramError::InvalidAccountData),
            }
        }
    }

    /// One betting period. `round_id == 0` means the record is uninitialized
    /// (real ids start at 1).
    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct Round {
        pub round_id: u64,
        pub ends_at: i64,
        /// Monotone while Active, frozen on resolution.
        pub total_deposits: u64,
        /// Snapshot of the registry rollover at creation. Immutable.
        pub rollover_in: u64,
        pub commit_hash: [u8; 32],
        pub revealed_answer: [u8; 64],
        pub revealed_salt: [u8; 64],
        pub status: u8,
        pub answer_len: u8,
        pub salt_len: u8,
        pub _padding: [u8; 5],
    }

    impl Round {
        pub fn status(&self) -> Result<RoundStatus, ProgramError> {
            RoundStatus::try_from(self.status)
        }

        pub fn set_status(&mut self, status: RoundStatus) {
            self.status = status as u8;
        }

        /// Stores the disclosed answer and salt. Callers must have verified
        /// both against MAX_REVEAL_LEN already.
        pub fn record_reveal(&mut self, answer: &[u8], salt: &[u8]) {
            self.revealed_answer[..answer.len()].copy_from_slice(answer);
            self.answer_len = answer.len() as u8;
            self.revealed_salt[..salt.len()].copy_from_slice(salt);
            self.salt_len = salt.len() as u8;
        }

        pub fn revealed_answer(&self) -> &[u8] {
            &self.revealed_answer[..self.answer_len as usize]
        }

        pub fn revealed_salt(&self) -> &[u8] {
            &self.revealed_salt[..self.salt_len as usize]
        }
    }

    /// Per round × depositor stake, accumulated across repeat deposits.
    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct Deposit {
        pub round_id: u64,
        pub user: [u8; 32],
        pub amount: u64,
    }

    /// Lamport custody record; carries no business fields.
    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct Vault {
        pub magic: u64,
    }

    pub fn read_game_state(data: &[u8]) -> Result<GameState, ProgramError> {
        if data.len() < GAME_STATE_LEN {
            return Err(ProgramError::InvalidAccountData);
        }
        let mut gs = GameState::zeroed();
        bytemuck::bytes_of_mut(&mut gs).copy_from_slice(&data[..GAME_STATE_LEN]);
        Ok(gs)
    }

    pub fn write_game_state(data: &mut [u8], gs: &GameState) {
        data[..GAME_STATE_LEN].copy_from_slice(bytemuck::bytes_of(gs));
    }

    pub fn read_round(data: &[u8]) -> Result<Round, ProgramError> {
        if data.len() < ROUND_LEN {
            return Err(ProgramError::InvalidAccountData);
        }
        let mut round = Round::zeroed();
        bytemuck::bytes_of_mut(&mut round).copy_from_slice(&data[..ROUND_LEN]);
        Ok(round)
    }

    pub fn write_round(data: &mut [u8], round: &Round) {
        data[..ROUND_LEN].copy_from_slice(bytemuck::bytes_of(round));
    }

    pub fn read_deposit(data: &[u8]) -> Result<Deposit, ProgramError> {
        if data.len() < DEPOSIT_LEN {
            return Err(ProgramError::InvalidAccountData);
        }
        let mut dep = Deposit::zeroed();
        bytemuck::bytes_of_mut(&mut dep).copy_from_slice(&data[..DEPOSIT_LEN]);
        Ok(dep)
    }

    pub fn write_deposit(data: &mut [u8], dep: &Deposit) {
        data[..DEPOSIT_LEN].copy_from_slice(bytemuck::bytes_of(dep));
    }

    pub fn read_vault(data: &[u8]) -> Result<Vault, ProgramError> {
        if data.len() < VAULT_LEN {
            return Err(ProgramError::InvalidAccountData);
        }
        let mut v = Vault::zeroed();
        bytemuck::bytes_of_mut(&mut v).copy_from_slice(&data[..VAULT_LEN]);
        Ok(v)
    }

    pub fn write_vault(data: &mut [u8], v: &Vault) {
        data[..VAULT_LEN].copy_from_slice(bytemuck::bytes_of(v));
    }
}

// 6. mod reveal
pub mod reveal {
    use solana_program::{hash::hashv, program_error::ProgramError};
    use crate::{constants::MAX_REVEAL_LEN, error::RoundBoxError};

    /// The commitment digest: SHA-256 over `answer ++ ":" ++ salt`.
    pub fn commitment(answer: &[u8], salt: &[u8]) -> [u8; 32] {
        hashv(&[answer, b":", salt]).to_bytes()
    }

    /// Checks a disclosed answer and salt against a round's commitment.
    /// Oversized inputs fail before any hashing happens.
    pub fn verify(answer: &[u8], salt: &[u8], commit_hash: &[u8; 32]) -> Result<(), ProgramError> {
        if answer.len() > MAX_REVEAL_LEN {
            return Err(RoundBoxError::AnswerTooLong.into());
        }
        if salt.len() > MAX_REVEAL_LEN {
            return Err(RoundBoxError::SaltTooLong.into());
        }
        if commitment(answer, salt) != *commit_hash {
            return Err(RoundBoxError::InvalidCommitHash.into());
        }
        Ok(())
    }
}

// 7. mod payout
pub mod payout {
    use crate::constants::{BPS_DENOM, BUYBACK_BPS, EVIDENCE_CAP_BPS, TREASURY_BPS, WINNER_BPS};
    use crate::error::RoundBoxError;

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct SettleSplit {
        pub winner: u64,
        pub treasury: u64,
        pub evidence_cap: u64,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct ExpireSplit {
        pub buyback: u64,
        pub treasury: u64,
        pub rollover_added: u64,
    }

    fn share(amount: u64, bps: u64) -> Result<u64, RoundBoxError> {
        Ok(amount.checked_mul(bps).ok_or(RoundBoxError::MathOverflow)? / BPS_DENOM)
    }

    /// Floor shares of a settle pool: winner 50%, treasury 5%, and the 30%
    /// evidence allowance.
    pub fn settle_split(pool: u64) -> Result<SettleSplit, RoundBoxError> {
        Ok(SettleSplit {
            winner: share(pool, WINNER_BPS)?,
            treasury: share(pool, TREASURY_BPS)?,
            evidence_cap: share(pool, EVIDENCE_CAP_BPS)?,
        })
    }

    /// Unconsumed remainder of a settle pool, including truncation dust and
    /// any unclaimed evidence allowance. Becomes the next rollover balance.
    pub fn settle_residual(
        pool: u64,
        split: &SettleSplit,
        evidence: u64,
    ) -> Result<u64, RoundBoxError> {
        pool.checked_sub(split.winner)
            .and_then(|v| v.checked_sub(evidence))
            .and_then(|v| v.checked_sub(split.treasury))
            .ok_or(RoundBoxError::MathOverflow)
    }

    /// Deposits-only split for the expiration paths: buyback 47.5%, treasury
    /// 5%, and a residual that absorbs all truncation dust so
    /// `buyback + treasury + rollover_added == total_deposits` for every
    /// possible input.
    pub fn expire_split(total_deposits: u64) -> Result<ExpireSplit, RoundBoxError> {
        let buyback = share(total_deposits, BUYBACK_BPS)?;
        let treasury = share(total_deposits, TREASURY_BPS)?;
        let rollover_added = total_deposits
            .checked_sub(buyback)
            .and_then(|v| v.checked_sub(treasury))
            .ok_or(RoundBoxError::MathOverflow)?;
        Ok(ExpireSplit { buyback, treasury, rollover_added })
    }

    /// Checked sum of caller-supplied evidence amounts.
    pub fn evidence_total(amounts: &[u64]) -> Result<u64, RoundBoxError> {
        amounts
            .iter()
            .try_fold(0u64, |acc, &x| acc.checked_add(x).ok_or(RoundBoxError::MathOverflow))
    }
}

// 8. mod vault
pub mod vault {
    use solana_program::{account_info::AccountInfo, program_error::ProgramError};
    use crate::error::RoundBoxError;

    #[cfg(not(test))]
    use solana_program::{program::invoke, system_instruction};

    /// Moves lamports out of a program-owned account. Zero amounts are a
    /// no-op so unclaimed shares cost nothing.
    pub fn transfer_out<'a>(
        from: &AccountInfo<'a>,
        to: &AccountInfo<'a>,
        amount: u64,
    ) -> Result<(), ProgramError> {
        if amount == 0 {
            return Ok(());
        }
        let mut from_lamports = from.try_borrow_mut_lamports()?;
        **from_lamports = from_lamports
            .checked_sub(amount)
            .ok_or(ProgramError::InsufficientFunds)?;
        let mut to_lamports = to.try_borrow_mut_lamports()?;
        **to_lamports = to_lamports
            .checked_add(amount)
            .ok_or(RoundBoxError::MathOverflow)?;
        Ok(())
    }

    /// Moves lamports from a depositor into the vault. The depositor is
    /// system-owned, so on-chain this is a system-program CPI; the test
    /// build adjusts balances directly the way the runtime would.
    pub fn deposit_in<'a>(
        _system_program: &AccountInfo<'a>,
        from: &AccountInfo<'a>,
        vault: &AccountInfo<'a>,
        amount: u64,
    ) -> Result<(), ProgramError> {
        #[cfg(not(test))]
        {
            let ix = system_instruction::transfer(from.key, vault.key, amount);
            invoke(&ix, &[from.clone(), vault.clone(), _system_program.clone()])
        }
        #[cfg(test)]
        {
            let mut from_lamports = from.try_borrow_mut_lamports()?;
            **from_lamports = from_lamports
                .checked_sub(amount)
                .ok_or(ProgramError::InsufficientFunds)?;
            let mut to_lamports = vault.try_borrow_mut_lamports()?;
            **to_lamports = to_lamports
                .checked_add(amount)
                .ok_or(RoundBoxError::MathOverflow)?;
            Ok(())
        }
    }
}

// 9. mod processor
pub mod processor {
    use bytemuck::Zeroable;
    use solana_program::{
        account_info::AccountInfo,
        clock::Clock,
        entrypoint::ProgramResult,
        msg,
        program_error::ProgramError,
        pubkey::Pubkey,
        sysvar::Sysvar,
    };
    use crate::{
        accounts,
        constants::{GRACE_PERIOD_SECS, MAGIC, VERSION},
        error::RoundBoxError,
        ix::Instruction,
        payout, reveal, state,
        state::{GameState, Round, RoundStatus, Vault},
        vault,
    };

    fn load_registry(program_id: &Pubkey, a_game: &AccountInfo) -> Result<GameState, ProgramError> {
        accounts::expect_owner(a_game, program_id)?;
        let (expected, _) = accounts::derive_game_state(program_id);
        accounts::expect_key(a_game, &expected)?;
        let data = a_game.try_borrow_data()?;
        let gs = state::read_game_state(&data)?;
        if gs.magic != MAGIC {
            return Err(RoundBoxError::NotInitialized.into());
        }
        if gs.version != VERSION {
            return Err(ProgramError::InvalidAccountData);
        }
        Ok(gs)
    }

    fn require_authority(gs: &GameState, signer: &AccountInfo) -> Result<(), ProgramError> {
        accounts::expect_signer(signer)?;
        if gs.authority != signer.key.to_bytes() {
            return Err(RoundBoxError::Unauthorized.into());
        }
        Ok(())
    }

    /// Loads a round and verifies the account really is the PDA for the
    /// round id it claims to hold.
    fn load_round(program_id: &Pubkey, a_round: &AccountInfo) -> Result<Round, ProgramError> {
        accounts::expect_owner(a_round, program_id)?;
        let data = a_round.try_borrow_data()?;
        let round = state::read_round(&data)?;
        if round.round_id == 0 {
            return Err(RoundBoxError::NotInitialized.into());
        }
        let (expected, _) = accounts::derive_round(program_id, round.round_id);
        accounts::expect_key(a_round, &expected)?;
        Ok(round)
    }

    /// The single guard that prevents double-settlement, settle-after-expire
    /// and deposits after resolution.
    fn require_active(round: &Round) -> Result<(), ProgramError> {
        match round.status()? {
            RoundStatus::Active => Ok(()),
            RoundStatus::Settled | RoundStatus::Expired => {
                Err(RoundBoxError::RoundNotActive.into())
            }
        }
    }

    fn require_resolved(round: &Round) -> Result<(), ProgramError> {
        match round.status()? {
            RoundStatus::Active => Err(RoundBoxError::RoundStillActive.into()),
            RoundStatus::Settled | RoundStatus::Expired => Ok(()),
        }
    }

    fn verify_vault(program_id: &Pubkey, a_vault: &AccountInfo) -> Result<(), ProgramError> {
        accounts::expect_owner(a_vault, program_id)?;
        let (expected, _) = accounts::derive_vault(program_id);
        accounts::expect_key(a_vault, &expected)?;
        let data = a_vault.try_borrow_data()?;
        let v = state::read_vault(&data)?;
        if v.magic != MAGIC {
            return Err(RoundBoxError::NotInitialized.into());
        }
        Ok(())
    }

    /// Shared tail of `Expire` and `EmergencyExpire`: deposits-only split,
    /// additive rollover, terminal Expired state. Prior rollover is never
    /// put at risk by this path.
    fn apply_expiry<'a>(
        gs: &mut GameState,
        round: &mut Round,
        a_vault: &AccountInfo<'a>,
        a_treasury: &AccountInfo<'a>,
        a_buyback: &AccountInfo<'a>,
    ) -> Result<(), ProgramError> {
        let split = payout::expire_split(round.total_deposits)?;
        gs.rollover_balance = gs
            .rollover_balance
            .checked_add(split.rollover_added)
            .ok_or(RoundBoxError::MathOverflow)?;

        vault::transfer_out(a_vault, a_buyback, split.buyback)?;
        vault::transfer_out(a_vault, a_treasury, split.treasury)?;

        round.set_status(RoundStatus::Expired);
        Ok(())
    }

    pub fn process_instruction<'a, 'b>(
        program_id: &Pubkey,
        accounts: &'b [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        let instruction = Instruction::decode(instruction_data)?;

        match instruction {
            Instruction::Initialize { treasury, buyback_wallet } => {
                accounts::expect_len(accounts, 3)?;
                let a_payer = &accounts[0];
                let a_game = &accounts[1];
                let a_vault = &accounts[2];

                accounts::expect_signer(a_payer)?;
                accounts::expect_writable(a_game)?;
                accounts::expect_writable(a_vault)?;
                accounts::expect_owner(a_game, program_id)?;
                accounts::expect_owner(a_vault, program_id)?;
                let (game_key, _) = accounts::derive_game_state(program_id);
                accounts::expect_key(a_game, &game_key)?;
                let (vault_key, _) = accounts::derive_vault(program_id);
                accounts::expect_key(a_vault, &vault_key)?;

                let mut game_data = a_game.try_borrow_mut_data()?;
                if state::read_game_state(&game_data)?.magic == MAGIC {
                    return Err(RoundBoxError::AlreadyInitialized.into());
                }
                let mut vault_data = a_vault.try_borrow_mut_data()?;
                if state::read_vault(&vault_data)?.magic == MAGIC {
                    return Err(RoundBoxError::AlreadyInitialized.into());
                }

                // First caller becomes the authority.
                let gs = GameState {
                    magic: MAGIC,
                    version: VERSION,
                    _padding: 0,
                    authority: a_payer.key.to_bytes(),
                    treasury: treasury.to_bytes(),
                    buyback_wallet: buyback_wallet.to_bytes(),
                    current_round_id: 0,
                    rollover_balance: 0,
                };
                state::write_game_state(&mut game_data, &gs);
                state::write_vault(&mut vault_data, &Vault { magic: MAGIC });

                msg!("roundbox: initialized");
            }
            Instruction::CreateRound { round_id, commit_hash, ends_at } => {
                accounts::expect_len(accounts, 4)?;
                let a_authority = &accounts[0];
                let a_game = &accounts[1];
                let a_round = &accounts[2];
                let a_clock = &accounts[3];

                accounts::expect_writable(a_game)?;
                accounts::expect_writable(a_round)?;

                let mut gs = load_registry(program_id, a_game)?;
                require_authority(&gs, a_authority)?;

                // Ids are dense: the only valid next id is current + 1, which
                // rejects 0, skips and duplicates alike.
                let next_id = gs
                    .current_round_id
                    .checked_add(1)
                    .ok_or(RoundBoxError::MathOverflow)?;
                if round_id != next_id {
                    return Err(RoundBoxError::InvalidRoundId.into());
                }

                let clock = Clock::from_account_info(a_clock)?;
                if ends_at <= clock.unix_timestamp {
                    return Err(RoundBoxError::InvalidEndTime.into());
                }

                accounts::expect_owner(a_round, program_id)?;
                let (round_key, _) = accounts::derive_round(program_id, round_id);
                accounts::expect_key(a_round, &round_key)?;

                let mut round_data = a_round.try_borrow_mut_data()?;
                let existing = state::read_round(&round_data)?;
                if existing.round_id != 0 || existing.status != 0 {
                    return Err(ProgramError::AccountAlreadyInitialized);
                }

                let mut round = Round::zeroed();
                round.round_id = round_id;
                round.ends_at = ends_at;
                round.commit_hash = commit_hash;
                // Snapshot; later registry changes do not reach this round.
                round.rollover_in = gs.rollover_balance;
                round.set_status(RoundStatus::Active);
                state::write_round(&mut round_data, &round);

                gs.current_round_id = round_id;
                let mut game_data = a_game.try_borrow_mut_data()?;
                state::write_game_state(&mut game_data, &gs);

                msg!("roundbox: round created");
            }
            Instruction::Deposit { amount } => {
                accounts::expect_len(accounts, 5)?;
                let a_player = &accounts[0];
                let a_round = &accounts[1];
                let a_deposit = &accounts[2];
                let a_vault = &accounts[3];
                let a_system = &accounts[4];

                accounts::expect_signer(a_player)?;
                accounts::expect_writable(a_round)?;
                accounts::expect_writable(a_deposit)?;
                accounts::expect_writable(a_vault)?;

                let mut round = load_round(program_id, a_round)?;
                require_active(&round)?;
                verify_vault(program_id, a_vault)?;

                accounts::expect_owner(a_deposit, program_id)?;
                let (deposit_key, _) =
                    accounts::derive_deposit(program_id, round.round_id, a_player.key);
                accounts::expect_key(a_deposit, &deposit_key)?;

                let mut deposit_data = a_deposit.try_borrow_mut_data()?;
                let mut dep = state::read_deposit(&deposit_data)?;
                if dep.round_id == 0 {
                    // First deposit for this (round, player); the PDA seeds
                    // already pin both fields.
                    dep.round_id = round.round_id;
                    dep.user = a_player.key.to_bytes();
                }
                dep.amount = dep
                    .amount
                    .checked_add(amount)
                    .ok_or(RoundBoxError::MathOverflow)?;
                round.total_deposits = round
                    .total_deposits
                    .checked_add(amount)
                    .ok_or(RoundBoxError::MathOverflow)?;

                vault::deposit_in(a_system, a_player, a_vault, amount)?;

                state::write_deposit(&mut deposit_data, &dep);
                let mut round_data = a_round.try_borrow_mut_data()?;
                state::write_round(&mut round_data, &round);

                msg!("roundbox: deposit recorded");
            }
            Instruction::Settle { answer, salt, evidence_amounts } => {
                accounts::expect_len(accounts, 6)?;
                let a_authority = &accounts[0];
                let a_game = &accounts[1];
                let a_round = &accounts[2];
                let a_vault = &accounts[3];
                let a_winner = &accounts[4];
                let a_treasury = &accounts[5];
                let evidence_wallets = &accounts[6..];

                accounts::expect_writable(a_game)?;
                accounts::expect_writable(a_round)?;
                accounts::expect_writable(a_vault)?;

                let mut gs = load_registry(program_id, a_game)?;
                // Capability checks come before anything else; the treasury
                // match is the only defense against fee redirection.
                require_authority(&gs, a_authority)?;
                if a_treasury.key.to_bytes() != gs.treasury {
                    return Err(RoundBoxError::Unauthorized.into());
                }

                let mut round = load_round(program_id, a_round)?;
                require_active(&round)?;
                verify_vault(program_id, a_vault)?;

                reveal::verify(&answer, &salt, &round.commit_hash)?;

                if evidence_wallets.len() != evidence_amounts.len() {
                    return Err(RoundBoxError::EvidenceMismatch.into());
                }

                let pool = round
                    .total_deposits
                    .checked_add(round.rollover_in)
                    .ok_or(RoundBoxError::MathOverflow)?;
                let split = payout::settle_split(pool)?;
                let evidence = payout::evidence_total(&evidence_amounts)?;
                if evidence > split.evidence_cap {
                    return Err(RoundBoxError::InvalidPayoutSum.into());
                }
                let residual = payout::settle_residual(pool, &split, evidence)?;

                vault::transfer_out(a_vault, a_winner, split.winner)?;
                for (wallet, &amount) in evidence_wallets.iter().zip(evidence_amounts.iter()) {
                    vault::transfer_out(a_vault, wallet, amount)?;
                }
                vault::transfer_out(a_vault, a_treasury, split.treasury)?;

                // Settle resets the accumulator to the exact unconsumed
                // remainder, truncation dust and unclaimed allowance included.
                gs.rollover_balance = residual;
                let mut game_data = a_game.try_borrow_mut_data()?;
                state::write_game_state(&mut game_data, &gs);

                round.set_status(RoundStatus::Settled);
                round.record_reveal(&answer, &salt);
                let mut round_data = a_round.try_borrow_mut_data()?;
                state::write_round(&mut round_data, &round);

                msg!("roundbox: round settled");
            }
            Instruction::Expire { answer, salt } => {
                accounts::expect_len(accounts, 6)?;
                let a_authority = &accounts[0];
                let a_game = &accounts[1];
                let a_round = &accounts[2];
                let a_vault = &accounts[3];
                let a_treasury = &accounts[4];
                let a_buyback = &accounts[5];

                accounts::expect_writable(a_game)?;
                accounts::expect_writable(a_round)?;
                accounts::expect_writable(a_vault)?;

                let mut gs = load_registry(program_id, a_game)?;
                require_authority(&gs, a_authority)?;
                if a_treasury.key.to_bytes() != gs.treasury {
                    return Err(RoundBoxError::Unauthorized.into());
                }
                if a_buyback.key.to_bytes() != gs.buyback_wallet {
                    return Err(RoundBoxError::Unauthorized.into());
                }

                let mut round = load_round(program_id, a_round)?;
                require_active(&round)?;
                verify_vault(program_id, a_vault)?;

                reveal::verify(&answer, &salt, &round.commit_hash)?;

                apply_expiry(&mut gs, &mut round, a_vault, a_treasury, a_buyback)?;
                round.record_reveal(&answer, &salt);

                let mut game_data = a_game.try_borrow_mut_data()?;
                state::write_game_state(&mut game_data, &gs);
                let mut round_data = a_round.try_borrow_mut_data()?;
                state::write_round(&mut round_data, &round);

                msg!("roundbox: round expired");
            }
            Instruction::EmergencyExpire => {
                accounts::expect_len(accounts, 7)?;
                let a_caller = &accounts[0];
                let a_game = &accounts[1];
                let a_round = &accounts[2];
                let a_vault = &accounts[3];
                let a_treasury = &accounts[4];
                let a_buyback = &accounts[5];
                let a_clock = &accounts[6];

                // Permissionless: any signer may trigger it once the grace
                // window has passed, so funds never strand if the authority
                // disappears.
                accounts::expect_signer(a_caller)?;
                accounts::expect_writable(a_game)?;
                accounts::expect_writable(a_round)?;
                accounts::expect_writable(a_vault)?;

                let mut gs = load_registry(program_id, a_game)?;
                if a_treasury.key.to_bytes() != gs.treasury {
                    return Err(RoundBoxError::Unauthorized.into());
                }
                if a_buyback.key.to_bytes() != gs.buyback_wallet {
                    return Err(RoundBoxError::Unauthorized.into());
                }

                let mut round = load_round(program_id, a_round)?;
                require_active(&round)?;
                verify_vault(program_id, a_vault)?;

                let deadline = round
                    .ends_at
                    .checked_add(GRACE_PERIOD_SECS)
                    .ok_or(RoundBoxError::MathOverflow)?;
                let clock = Clock::from_account_info(a_clock)?;
                if clock.unix_timestamp < deadline {
                    return Err(RoundBoxError::GracePeriodNotElapsed.into());
                }

                // No reveal: the answer stays permanently undisclosed.
                apply_expiry(&mut gs, &mut round, a_vault, a_treasury, a_buyback)?;

                let mut game_data = a_game.try_borrow_mut_data()?;
                state::write_game_state(&mut game_data, &gs);
                let mut round_data = a_round.try_borrow_mut_data()?;
                state::write_round(&mut round_data, &round);

                msg!("roundbox: round emergency-expired");
            }
            Instruction::CloseRound => {
                accounts::expect_len(accounts, 3)?;
                let a_authority = &accounts[0];
                let a_game = &accounts[1];
                let a_round = &accounts[2];

                accounts::expect_writable(a_authority)?;
                accounts::expect_writable(a_round)?;

                let gs = load_registry(program_id, a_game)?;
                require_authority(&gs, a_authority)?;

                let round = load_round(program_id, a_round)?;
                require_resolved(&round)?;

                // Reclaim the storage reserve and wipe the record. Registry
                // rollover and the frozen totals are unaffected.
                vault::transfer_out(a_round, a_authority, a_round.lamports())?;
                let mut round_data = a_round.try_borrow_mut_data()?;
                round_data.fill(0);

                msg!("roundbox: round closed");
            }
            Instruction::CloseDeposit => {
                accounts::expect_len(accounts, 4)?;
                let a_authority = &accounts[0];
                let a_game = &accounts[1];
                let a_round = &accounts[2];
                let a_deposit = &accounts[3];

                accounts::expect_writable(a_authority)?;
                accounts::expect_writable(a_deposit)?;

                let gs = load_registry(program_id, a_game)?;
                require_authority(&gs, a_authority)?;

                // A deposit cannot be reclaimed while its round still
                // accepts funds.
                let round = load_round(program_id, a_round)?;
                require_resolved(&round)?;

                accounts::expect_owner(a_deposit, program_id)?;
                let dep = {
                    let data = a_deposit.try_borrow_data()?;
                    state::read_deposit(&data)?
                };
                if dep.round_id != round.round_id {
                    return Err(ProgramError::InvalidArgument);
                }
                let (deposit_key, _) = accounts::derive_deposit(
                    program_id,
                    dep.round_id,
                    &Pubkey::new_from_array(dep.user),
                );
                accounts::expect_key(a_deposit, &deposit_key)?;

                vault::transfer_out(a_deposit, a_authority, a_deposit.lamports())?;
                let mut deposit_data = a_deposit.try_borrow_mut_data()?;
                deposit_data.fill(0);

                msg!("roundbox: deposit closed");
            }
        }
        Ok(())
    }
}

// 10. mod entrypoint
#[cfg(not(feature = "no-entrypoint"))]
pub mod entrypoint {
    use solana_program::{
        account_info::AccountInfo, entrypoint, entrypoint::ProgramResult, pubkey::Pubkey,
    };
    use crate::processor;

    entrypoint!(process_instruction);

    fn process_instruction<'a>(
        program_id: &Pubkey,
        accounts: &'a [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        processor::process_instruction(program_id, accounts, instruction_data)
    }
}
