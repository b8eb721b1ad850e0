//! Checks a candidate block against the chain state it is supposed to extend.

use rollnode_common::{
    block::{evidence_hash, Address, Block, BlockId, Commit, ADDRESS_LENGTH},
    state::State,
    validator::ValidatorSet,
};
use std::fmt::Display;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HeightError {
    #[error("block height {height} lower than initial height {initial_height}")]
    BelowInitialHeight { height: u64, initial_height: u64 },
    #[error("wrong block height: expected {expected}, got {got}")]
    Unexpected { expected: u64, got: u64 },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProposerError {
    #[error("proposer address has {0} bytes")]
    InvalidLength(usize),
    #[error("proposer {0} is not a validator")]
    NotValidator(Address),
    #[error("wrong proposer: expected {expected}, got {got}")]
    NotProposer { expected: Address, got: Address },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "invalid commit: expected height {expected_height} for block {expected_block_id}, \
     got height {height} for block {block_id}"
)]
pub struct CommitHeightError {
    pub expected_height: u64,
    pub height: u64,
    pub expected_block_id: BlockId,
    pub block_id: BlockId,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid commit signatures: expected {expected}, got {got}")]
pub struct CommitSignatureError {
    pub expected: usize,
    pub got: usize,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitVerifyError {
    #[error("signature {index} is from {got}, expected validator {expected}")]
    WrongValidator { index: usize, expected: Address, got: Address },
    #[error("signature {index} does not verify")]
    InvalidSignature { index: usize },
    #[error("insufficient voting power: got {tallied}, needed more than 2/3 of {total}")]
    InsufficientPower { tallied: u64, total: u64 },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error(transparent)]
    Height(#[from] HeightError),
    #[error("wrong {field}: expected {expected}, got {got}")]
    FieldMismatch { field: &'static str, expected: String, got: String },
    #[error(transparent)]
    CommitHeight(#[from] CommitHeightError),
    #[error(transparent)]
    CommitSignatures(#[from] CommitSignatureError),
    #[error(transparent)]
    Proposer(#[from] ProposerError),
    #[error(transparent)]
    Commit(#[from] CommitVerifyError),
}

/// Verifies the signatures of a last commit against the validators that produced it.
pub trait CommitVerifier: Send + Sync {
    fn verify_commit(
        &self, chain_id: &str, validators: &ValidatorSet, commit: &Commit,
    ) -> Result<(), CommitVerifyError>;
}

#[derive(Debug, Clone, Copy, Default)]
/// Recovers the secp256k1 signer of every vote and requires more than 2/3 of the voting power
/// to have committed to the block.
pub struct EcdsaCommitVerifier;

impl CommitVerifier for EcdsaCommitVerifier {
    fn verify_commit(
        &self, chain_id: &str, validators: &ValidatorSet, commit: &Commit,
    ) -> Result<(), CommitVerifyError> {
        let mut tallied: u64 = 0;
        for (index, (sig, validator)) in
            commit.signatures.iter().zip(validators.validators()).enumerate()
        {
            if sig.is_absent() {
                continue;
            }
            if sig.validator_address != validator.address {
                return Err(CommitVerifyError::WrongValidator {
                    index,
                    expected: validator.address,
                    got: sig.validator_address,
                });
            }
            let vote = commit
                .canonical_vote(chain_id, index)
                .ok_or(CommitVerifyError::InvalidSignature { index })?;
            let signer = sig
                .signature
                .recover(&vote.sign_bytes())
                .map_err(|_| CommitVerifyError::InvalidSignature { index })?;
            if signer != validator.address {
                return Err(CommitVerifyError::InvalidSignature { index });
            }
            if sig.is_for_block() {
                tallied = tallied.saturating_add(validator.voting_power);
            }
        }

        let total = validators.total_voting_power();
        if (tallied as u128) * 3 <= (total as u128) * 2 {
            return Err(CommitVerifyError::InsufficientPower { tallied, total });
        }
        Ok(())
    }
}

fn check_field<T: PartialEq + Display>(
    field: &'static str, expected: T, got: T,
) -> Result<(), ValidationError> {
    if expected != got {
        return Err(ValidationError::FieldMismatch {
            field,
            expected: expected.to_string(),
            got: got.to_string(),
        });
    }
    Ok(())
}

/// Validates `block` against `state` with the default commit verifier.
pub fn validate_block(state: &State, block: &Block) -> Result<(), ValidationError> {
    validate_block_with(state, block, &EcdsaCommitVerifier)
}

/// Validates `block` against `state`. The first failing check determines the error.
pub fn validate_block_with(
    state: &State, block: &Block, verifier: &dyn CommitVerifier,
) -> Result<(), ValidationError> {
    let header = &block.header;

    if header.height < state.initial_height {
        return Err(HeightError::BelowInitialHeight {
            height: header.height,
            initial_height: state.initial_height,
        }
        .into());
    }
    let expected_height = state.last_block_height + 1;
    if header.height != expected_height {
        let got = header.height;
        return Err(HeightError::Unexpected { expected: expected_height, got }.into());
    }

    check_field("version", state.version, header.version)?;
    check_field("chain_id", state.chain_id.as_str(), header.chain_id.as_str())?;

    let is_initial = header.height == state.initial_height;
    let time_ok = if is_initial {
        header.time >= state.last_block_time
    } else {
        header.time > state.last_block_time
    };
    if !time_ok {
        let bound = if is_initial { ">=" } else { ">" };
        return Err(ValidationError::FieldMismatch {
            field: "time",
            expected: format!("{} {}", bound, state.last_block_time),
            got: header.time.to_string(),
        });
    }

    check_field("last_block_id", state.last_block_id, header.last_block_id)?;
    check_field("last_commit_hash", block.last_commit.hash(), header.last_commit_hash)?;

    check_field("validators_hash", state.validators.hash(), header.validators_hash)?;
    check_field("next_validators_hash", state.next_validators.hash(), header.next_validators_hash)?;
    check_field("consensus_hash", state.consensus_params.hash(), header.consensus_hash)?;
    check_field("app_hash", state.app_hash, header.app_hash)?;
    check_field("last_results_hash", state.last_results_hash, header.last_results_hash)?;

    check_field("evidence_hash", evidence_hash(&block.evidence), header.evidence_hash)?;
    check_field("data_hash", block.data.hash(), header.data_hash)?;

    validate_proposer(state, block)?;
    validate_last_commit(state, block, verifier)
}

fn validate_proposer(state: &State, block: &Block) -> Result<(), ProposerError> {
    let raw = &block.header.proposer_address;
    if raw.len() != ADDRESS_LENGTH {
        return Err(ProposerError::InvalidLength(raw.len()));
    }
    let proposer = Address::from_slice(raw);
    if !state.validators.has_address(&proposer) {
        return Err(ProposerError::NotValidator(proposer));
    }
    match state.validators.get_proposer() {
        Some(expected) if expected.address == proposer => Ok(()),
        Some(expected) => {
            Err(ProposerError::NotProposer { expected: expected.address, got: proposer })
        },
        None => Err(ProposerError::NotValidator(proposer)),
    }
}

/// Checks the commit for the previous block. The round the previous block was committed in is
/// not part of the state, so a wrong round is not reported as a `CommitHeightError`; it changes
/// the signed vote and fails signature verification instead.
fn validate_last_commit(
    state: &State, block: &Block, verifier: &dyn CommitVerifier,
) -> Result<(), ValidationError> {
    let commit = &block.last_commit;
    if block.height() == state.initial_height {
        if !commit.signatures.is_empty() {
            return Err(
                CommitSignatureError { expected: 0, got: commit.signatures.len() }.into()
            );
        }
        return Ok(());
    }

    let expected_height = block.height() - 1;
    if commit.height != expected_height || commit.block_id != state.last_block_id {
        return Err(CommitHeightError {
            expected_height,
            height: commit.height,
            expected_block_id: state.last_block_id,
            block_id: commit.block_id,
        }
        .into());
    }
    if commit.signatures.len() != state.last_validators.len() {
        return Err(CommitSignatureError {
            expected: state.last_validators.len(),
            got: commit.signatures.len(),
        }
        .into());
    }
    verifier.verify_commit(&state.chain_id, &state.last_validators, commit)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::{
        validate_block, CommitHeightError, CommitSignatureError, CommitVerifier,
        CommitVerifyError, EcdsaCommitVerifier, HeightError, ProposerError, ValidationError,
    };
    use crate::test_utils::{
        executor_with_state, make_and_commit_good_block, make_data, make_state, sign_vote,
    };
    use alloy_primitives::Bytes;
    use k256::ecdsa::SigningKey;
    use rollnode_common::{
        address_from_sk,
        block::{
            Block, BlockId, BlockIdFlag, CanonicalVote, Commit, CommitSig, PartSetHeader, Version,
        },
        merkle::Hash,
        state::State,
    };

    const STOP_HEIGHT: u64 = 10;

    fn wrong_hash() -> Hash {
        Hash([0xab; 32])
    }

    type Malleation = (&'static str, Box<dyn Fn(&mut Block)>);

    fn case(name: &'static str, malleate: impl Fn(&mut Block) + 'static) -> Malleation {
        (name, Box::new(malleate))
    }

    fn header_malleations(state: &State) -> Vec<Malleation> {
        let wrong_version_block = Version::new(state.version.block + 2, state.version.app);
        let wrong_version_app = Version::new(state.version.block, state.version.app + 2);
        vec![
            case("version block wrong", move |b| b.header.version = wrong_version_block),
            case("version app wrong", move |b| b.header.version = wrong_version_app),
            case("chain_id wrong", |b| b.header.chain_id = "not-the-real-one".into()),
            case("height wrong", |b| b.header.height += 10),
            case("time wrong", |b| b.header.time -= 1_000),
            case("last_block_id wrong", |b| b.header.last_block_id.part_set_header.total += 10),
            case("last_commit_hash wrong", |b| b.header.last_commit_hash = wrong_hash()),
            case("validators_hash wrong", |b| b.header.validators_hash = wrong_hash()),
            case("next_validators_hash wrong", |b| b.header.next_validators_hash = wrong_hash()),
            case("consensus_hash wrong", |b| b.header.consensus_hash = wrong_hash()),
            case("app_hash wrong", |b| b.header.app_hash = wrong_hash()),
            case("last_results_hash wrong", |b| b.header.last_results_hash = wrong_hash()),
            case("evidence_hash wrong", |b| b.header.evidence_hash = wrong_hash()),
            case("data_hash wrong", |b| b.header.data_hash = wrong_hash()),
            case("proposer wrong", |b| {
                let outsider = address_from_sk(&SigningKey::random(&mut rand::thread_rng()));
                b.header.proposer_address = Bytes::copy_from_slice(outsider.as_slice());
            }),
            case("proposer invalid", |b| {
                b.header.proposer_address = Bytes::from_static(b"wrong size")
            }),
        ]
    }

    #[test]
    fn test_validate_block_header() {
        let (state, keys) = make_state(3, 1);
        let mut executor = executor_with_state(state);
        let mut last_commit = Commit::new(
            0,
            0,
            BlockId {
                hash: Hash([1; 32]),
                part_set_header: PartSetHeader { total: 0, hash: Hash([2; 32]) },
            },
            vec![],
        );

        for height in 1..STOP_HEIGHT {
            let state = executor.state().clone();
            let proposer = state.validators.get_proposer().unwrap().address;
            for (name, malleate) in header_malleations(&state) {
                let data = make_data(height);
                let mut block =
                    state.make_block(height, data, last_commit.clone(), vec![], proposer);
                malleate(&mut block);
                assert!(validate_block(&state, &block).is_err(), "{name} at height {height}");
            }

            last_commit = make_and_commit_good_block(&mut executor, height, last_commit, &keys)
                .unwrap_or_else(|e| panic!("height {height}: {e}"));
            assert_eq!(executor.state().last_block_height, height);
        }

        let mut state = executor.state().clone();
        let proposer = state.validators.get_proposer().unwrap().address;
        let data = make_data(STOP_HEIGHT);
        let block = state.make_block(STOP_HEIGHT, data, last_commit, vec![], proposer);
        state.initial_height = STOP_HEIGHT + 1;
        let before = state.clone();
        let err = validate_block(&state, &block).unwrap_err();
        assert!(err.to_string().contains("lower than initial height"), "{err}");
        assert!(matches!(err, ValidationError::Height(HeightError::BelowInitialHeight { .. })));
        assert_eq!(state, before);
    }

    #[test]
    fn test_validate_block_commit() {
        let (state, keys) = make_state(1, 1);
        let mut executor = executor_with_state(state);
        let mut last_commit = Commit::default();
        let mut wrong_sigs_commit = Commit::new(1, 0, BlockId::default(), vec![]);
        let bad_key = SigningKey::random(&mut rand::thread_rng());

        for height in 1..STOP_HEIGHT {
            let state = executor.state().clone();
            let proposer = state.validators.get_proposer().unwrap().address;
            if height > 1 {
                // should reference height - 1
                let proposer_key = &keys[&proposer];
                let timestamp = state.last_block_time + 1;
                let last_block_id = state.last_block_id;
                let wrong_height_vote =
                    sign_vote(&state.chain_id, height, last_block_id, proposer_key, timestamp);
                let wrong_height_commit =
                    Commit::new(height, 0, state.last_block_id, vec![wrong_height_vote]);
                let data = make_data(height);
                let block = state.make_block(height, data, wrong_height_commit, vec![], proposer);
                assert!(!block.header.last_block_id.is_zero());
                let err = validate_block(&state, &block).unwrap_err();
                assert!(
                    matches!(err, ValidationError::CommitHeight(CommitHeightError { .. })),
                    "height {height}: {err}"
                );

                let data = make_data(height);
                let commit = wrong_sigs_commit.clone();
                let block = state.make_block(height, data, commit, vec![], proposer);
                let err = validate_block(&state, &block).unwrap_err();
                assert!(
                    matches!(err, ValidationError::CommitSignatures(CommitSignatureError { .. })),
                    "height {height}: {err}"
                );
            }

            last_commit = make_and_commit_good_block(&mut executor, height, last_commit, &keys)
                .unwrap_or_else(|e| panic!("height {height}: {e}"));

            // a good commit plus an extra signature from a non-validator
            let good_vote = last_commit.signatures[0].clone();
            let bad_vote = sign_vote(
                &executor.state().chain_id,
                height,
                last_commit.block_id,
                &bad_key,
                good_vote.timestamp,
            );
            wrong_sigs_commit =
                Commit::new(height, 0, last_commit.block_id, vec![good_vote, bad_vote]);
        }
    }

    #[test]
    fn test_initial_block_rejects_signatures() {
        let (state, keys) = make_state(2, 1);
        let proposer = state.validators.get_proposer().unwrap().address;
        let key = keys.values().next().unwrap();
        let vote = sign_vote(&state.chain_id, 0, BlockId::default(), key, 0);
        let commit = Commit::new(0, 0, BlockId::default(), vec![vote]);
        let block = state.make_block(1, make_data(1), commit, vec![], proposer);
        assert_eq!(
            validate_block(&state, &block),
            Err(CommitSignatureError { expected: 0, got: 1 }.into())
        );
    }

    #[test]
    fn test_proposer_errors() {
        let (state, _) = make_state(3, 1);
        let expected = state.validators.get_proposer().unwrap().address;
        let other = state
            .validators
            .validators()
            .iter()
            .map(|v| v.address)
            .find(|a| *a != expected)
            .unwrap();

        let block = state.make_block(1, make_data(1), Commit::default(), vec![], other);
        assert_eq!(
            validate_block(&state, &block),
            Err(ProposerError::NotProposer { expected, got: other }.into())
        );

        let mut block = state.make_block(1, make_data(1), Commit::default(), vec![], expected);
        block.header.proposer_address = Bytes::from_static(b"short");
        assert_eq!(validate_block(&state, &block), Err(ProposerError::InvalidLength(5).into()));
    }

    #[test]
    fn test_wrong_commit_round_fails_signatures() {
        let (state, keys) = make_state(3, 1);
        let mut executor = executor_with_state(state);
        let mut commit =
            make_and_commit_good_block(&mut executor, 1, Commit::default(), &keys).unwrap();
        commit.round = 1;

        let state = executor.state();
        let proposer = state.validators.get_proposer().unwrap().address;
        let block = state.make_block(2, make_data(2), commit, vec![], proposer);
        assert_eq!(
            validate_block(state, &block),
            Err(ValidationError::Commit(CommitVerifyError::InvalidSignature { index: 0 }))
        );
    }

    #[test]
    fn test_commit_verifier() {
        let (state, keys) = make_state(3, 1);
        let mut executor = executor_with_state(state);
        let commit =
            make_and_commit_good_block(&mut executor, 1, Commit::default(), &keys).unwrap();
        let state = executor.state();
        let signers = &state.last_validators;
        let verifier = EcdsaCommitVerifier;
        assert_eq!(verifier.verify_commit(&state.chain_id, signers, &commit), Ok(()));

        // wrong chain id changes the sign bytes
        assert_eq!(
            verifier.verify_commit("other-chain", signers, &commit),
            Err(CommitVerifyError::InvalidSignature { index: 0 })
        );

        // the round is part of the sign bytes
        let mut wrong_round = commit.clone();
        wrong_round.round = 1;
        assert_eq!(
            verifier.verify_commit(&state.chain_id, signers, &wrong_round),
            Err(CommitVerifyError::InvalidSignature { index: 0 })
        );

        let mut weak = commit.clone();
        weak.signatures[1] = CommitSig::absent();
        weak.signatures[2] = CommitSig::absent();
        assert_eq!(
            verifier.verify_commit(&state.chain_id, signers, &weak),
            Err(CommitVerifyError::InsufficientPower { tallied: 1, total: 3 })
        );

        // a nil vote verifies but its power is not tallied
        let nil_voter = &keys[&signers.validators()[2].address];
        let nil_vote = CanonicalVote {
            height: 1,
            round: 0,
            block_id: BlockId::default(),
            timestamp: commit.signatures[2].timestamp,
            chain_id: state.chain_id.clone(),
        };
        let mut nil = commit.clone();
        nil.signatures[2] = nil_vote.sign(nil_voter, BlockIdFlag::Nil).unwrap();
        assert_eq!(
            verifier.verify_commit(&state.chain_id, signers, &nil),
            Err(CommitVerifyError::InsufficientPower { tallied: 2, total: 3 })
        );

        let mut swapped = commit;
        swapped.signatures.swap(0, 1);
        assert!(matches!(
            verifier.verify_commit(&state.chain_id, signers, &swapped),
            Err(CommitVerifyError::WrongValidator { index: 0, .. })
        ));
    }
}
