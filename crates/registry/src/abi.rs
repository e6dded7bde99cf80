//! Agent registry contract bindings.

use alloy::sol;

sol! {
    #[sol(rpc)]
    interface IAgentRegistry {
        /// Returns the agent contract for a branch hash, or the zero
        /// address when no agent has been registered.
        function agentForBranch(bytes32 branchHash) external view returns (address);

        /// Deploys and registers an agent contract for a branch hash.
        /// Reverts with "already registered" when the hash is taken.
        function registerAgent(bytes32 branchHash) external returns (address);

        event AgentRegistered(bytes32 indexed branchHash, address agent);
    }
}
