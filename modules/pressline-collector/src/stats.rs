/// Stats from one collector run.
#[derive(Debug, Default)]
pub struct CollectStats {
    pub collected: u32,
    pub published: u32,
    pub rejected_quality: u32,
    pub rejected_dedup: u32,
    pub sources_ok: u32,
    pub sources_failed: u32,
}

impl std::fmt::Display for CollectStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Collection Run Complete ===")?;
        writeln!(f, "Sources ok:       {}", self.sources_ok)?;
        writeln!(f, "Sources failed:   {}", self.sources_failed)?;
        writeln!(f, "Items collected:  {}", self.collected)?;
        writeln!(f, "Rejected quality: {}", self.rejected_quality)?;
        writeln!(f, "Rejected dedup:   {}", self.rejected_dedup)?;
        writeln!(f, "Topics published: {}", self.published)?;
        Ok(())
    }
}
