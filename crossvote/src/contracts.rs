//! The fixed surface of the external voting contract. The contract itself is deployed
//! out-of-band; this crate only ever talks to it through this interface.

use alloy::sol;

sol! {
    #[sol(rpc)]
    contract CrossChainVoting {
        struct Vote {
            uint256 proposalId;
            address voter;
            bool support;
        }

        function castVote(uint256 _proposalId, bool _support) external;
        function createProposal(string calldata _description, uint256 _votingPeriod) external;
        function hasVoted(uint256 _proposalId, address _voter) external view returns (bool);
        function getVoterDirection(uint256 _proposalId, address _voter) external view returns (uint8);
        function getProposal(uint256 _proposalId)
            external
            view
            returns (
                string memory description,
                uint256 startTime,
                uint256 endTime,
                uint256 totalVotesFor,
                uint256 totalVotesAgainst
            );
        function getChainVotes(uint256 _proposalId, uint256 _chainId)
            external
            view
            returns (uint256 votesFor, uint256 votesAgainst);
        function nextProposalId() external view returns (uint256);
        function governanceChainId() external view returns (uint256);

        event ProposalCreated(uint256 indexed proposalId, string description, uint256 startTime, uint256 endTime);
        event VoteCasted(uint256 proposalId, address voter, bool support);
        event VoteSent(uint256 sourceChainId, Vote vote);

        error AlreadyVoted();
        error ProposalNotActive();
        error NotGovernanceChain();
        error VotingPeriodNotEnded();
        error InvalidDestination();
        error CallerNotL2ToL2CrossDomainMessenger();
        error InvalidCrossDomainSender();
    }
}
