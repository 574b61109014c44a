use alloy::sol_types::SolInterface;

use crate::contracts::CrossChainVoting::CrossChainVotingErrors;

/// An error from a chain client operation.
///
/// Nothing here is fatal to the process. Every failure is local to the operation that
/// produced it and recoverable by retry.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("transaction rejected by user")]
    UserRejected,
    #[error("execution reverted: {reason}")]
    Reverted { reason: String },
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed event record: {0}")]
    MalformedEvent(String),
    #[error("another transaction is already in flight")]
    InFlight,
}

impl Error {
    /// Classify a raw wallet/transport failure by its message. Wallets and RPC nodes do
    /// not agree on error shapes, so this is necessarily string matching.
    pub fn classify(text: String) -> Self {
        let lower = text.to_lowercase();
        if lower.contains("rejected") || lower.contains("denied") || text.contains("4001") {
            Error::UserRejected
        } else if lower.contains("insufficient funds") {
            Error::InsufficientFunds
        } else if let Some(i) = text.find("execution reverted") {
            let reason = text[i + "execution reverted".len()..]
                .trim_start_matches(':')
                .trim()
                .to_string();
            Error::Reverted { reason }
        } else {
            Error::Network(text)
        }
    }

    /// Convert a failed contract call into a typed error, decoding the revert data
    /// against the voting contract's error catalog where possible.
    pub fn from_contract(err: alloy::contract::Error) -> Self {
        if let alloy::contract::Error::TransportError(rpc_err) = &err {
            if let Some(payload) = rpc_err.as_error_resp() {
                if let Some(data) = payload.as_revert_data() {
                    if let Ok(decoded) = CrossChainVotingErrors::abi_decode(&data, true) {
                        return Error::Reverted {
                            reason: revert_name(&decoded).to_string(),
                        };
                    }
                    if let Some(reason) = alloy::sol_types::decode_revert_reason(&data) {
                        return Error::Reverted {
                            reason: reason
                                .trim_start_matches("execution reverted:")
                                .trim()
                                .to_string(),
                        };
                    }
                }
            }
        }

        Error::classify(err.to_string())
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        Error::Network(err.to_string())
    }

    /// The message shown to the user. Revert reasons are mapped through a fixed catalog;
    /// unrecognized reasons pass through raw.
    pub fn user_message(&self) -> String {
        match self {
            Error::UserRejected => "Transaction was rejected by user".to_string(),
            Error::Reverted { reason } => match reason.as_str() {
                "CallerNotL2ToL2CrossDomainMessenger" => {
                    "Invalid cross-chain message sender".to_string()
                }
                "InvalidCrossDomainSender" => "Invalid cross-chain sender address".to_string(),
                "NotGovernanceChain" => {
                    "Operation must be performed on governance chain".to_string()
                }
                "InvalidDestination" => "Invalid destination chain".to_string(),
                "ProposalNotActive" => "This proposal is not currently active".to_string(),
                "AlreadyVoted" => "You have already voted on this proposal".to_string(),
                "VotingPeriodNotEnded" => "The voting period has not ended yet".to_string(),
                other => other.to_string(),
            },
            Error::Network(_) => {
                "Network error. Please check your connection and try again".to_string()
            }
            Error::InsufficientFunds => {
                "Insufficient funds to complete this transaction".to_string()
            }
            Error::InFlight => "A transaction is already in progress".to_string(),
            Error::MalformedEvent(_) => {
                "An error occurred while processing your transaction".to_string()
            }
        }
    }
}

fn revert_name(err: &CrossChainVotingErrors) -> &'static str {
    match err {
        CrossChainVotingErrors::AlreadyVoted(_) => "AlreadyVoted",
        CrossChainVotingErrors::ProposalNotActive(_) => "ProposalNotActive",
        CrossChainVotingErrors::NotGovernanceChain(_) => "NotGovernanceChain",
        CrossChainVotingErrors::VotingPeriodNotEnded(_) => "VotingPeriodNotEnded",
        CrossChainVotingErrors::InvalidDestination(_) => "InvalidDestination",
        CrossChainVotingErrors::CallerNotL2ToL2CrossDomainMessenger(_) => {
            "CallerNotL2ToL2CrossDomainMessenger"
        }
        CrossChainVotingErrors::InvalidCrossDomainSender(_) => "InvalidCrossDomainSender",
    }
}
