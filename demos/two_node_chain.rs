//! Two-node chain example.
//!
//! A household owes a bank 100 but only has 40 of its own. The bank owes
//! nothing, so the default stops with the household.

use cascade_clearing::prelude::*;

fn main() -> Result<(), ClearingError> {
    println!("╔══════════════════════════════════════════════╗");
    println!("║  cascade-clearing: Two-Node Chain Example    ║");
    println!("╚══════════════════════════════════════════════╝\n");

    let household = NodeId::new(0);
    let bank = NodeId::new(1);
    let sink = NodeId::new(2);

    let mut builder = LiabilityGraphBuilder::new(3, sink)?;
    builder.add_liability(household, bank, 100.0)?;
    builder.add_resources(household, 40.0)?;
    let request = ClearingRequest::new(1, builder.build());

    println!("Liabilities:");
    println!("  Household → Bank: 100 (household has 40 of its own)\n");

    let engine = ClearingEngine::new(ClearingConfig::default())?;
    let response = engine.clear(&request)?;

    for (name, node) in [("Household", household), ("Bank", bank)] {
        let outcome = response.node(node);
        println!(
            "  {:<10} ratio {:.2}  equity {:>7.2}  default round {}",
            name,
            outcome.ratio,
            outcome.equity,
            outcome.default_round()
        );
    }
    println!();
    println!("{}", response);
    Ok(())
}
