use anchor_client::solana_sdk::{
    compute_budget::ComputeBudgetInstruction, instruction::Instruction,
};

pub const DEFAULT_COMPUTE_UNIT_LIMIT: u32 = 100_000;

pub fn limit_instruction(units: u32) -> Instruction {
    ComputeBudgetInstruction::set_compute_unit_limit(units)
}

pub fn price_instruction(micro_lamports: u64) -> Instruction {
    ComputeBudgetInstruction::set_compute_unit_price(micro_lamports)
}

/// Compute budget prefix placed ahead of every swap.
pub fn budget_instructions(units: u32, micro_lamports: u64) -> [Instruction; 2] {
    [limit_instruction(units), price_instruction(micro_lamports)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_client::solana_sdk::compute_budget;

    #[test]
    fn budget_targets_the_compute_budget_program() {
        let [limit, price] = budget_instructions(DEFAULT_COMPUTE_UNIT_LIMIT, 1_300);
        assert_eq!(limit.program_id, compute_budget::id());
        assert_eq!(price.program_id, compute_budget::id());
        assert_eq!(limit, ComputeBudgetInstruction::set_compute_unit_limit(100_000));
        assert_eq!(price, ComputeBudgetInstruction::set_compute_unit_price(1_300));
    }
}
