use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info};
use nbase_prep::{prepare_gene, validate, write_outputs, Outcome, RawOptions};
use std::path::PathBuf;
use std::time::Instant;

/// nbase: input preparation for reference-panel eQTL mapping
#[derive(Parser)]
#[command(
    name = "nbase",
    version,
    about = "nbase: prepare NB / NB-ASE eQTL model inputs with rSNP genotypes from a haplotype reference panel"
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare the model inputs of one gene
    #[command(after_help = "EXAMPLES:
    # Combined model, 100 kb flank, default filters
    nbase prep --gene ENSG00000100364 --chrom 22 --counts counts.tsv --fsnps fsnps.tsv \\
        --gene-coords genes.tsv --variants calls.vcf.gz \\
        --legend chr22.legend.gz --haps chr22.hap.gz --out-dir out/

    # Count-only model for an explicit list of rSNPs, no tagging
    nbase prep --model NB --cis-window 1000:A:G,2000:C:T --tag no ...

    # Drop fSNPs whose heterozygosity differs from the EUR panel (p <= 0.01)
    nbase prep --ex-fsnp 0.01 --panel-samples panel.samples --population EUR ...

MODELS:
    NB-ASE          total counts + allele-specific expression
    NB              total counts only
    both            NB-ASE, falling back to NB when ASE is unusable (default)")]
    Prep {
        // === Gene ===
        /// Gene identifier as used in the counts and coordinate files
        #[arg(long, help_heading = "Gene")]
        gene: String,

        /// Chromosome of the gene
        #[arg(long, help_heading = "Gene")]
        chrom: String,

        /// Model family: NB-ASE, NB or both
        #[arg(long, help_heading = "Gene")]
        model: Option<String>,

        // === Input/Output ===
        /// Total counts (gene_id column plus one column per sample)
        #[arg(long, help_heading = "Input/Output")]
        counts: PathBuf,

        /// Exonic SNPs per gene (gene_id, chrom, pos, ref, alt)
        #[arg(long, help_heading = "Input/Output")]
        fsnps: PathBuf,

        /// Gene coordinates (gene_id, chrom, start, end) or legacy gene table
        #[arg(long, help_heading = "Input/Output")]
        gene_coords: PathBuf,

        /// Exon coordinates, required with a legacy gene table
        #[arg(long, help_heading = "Input/Output")]
        exon_coords: Option<PathBuf>,

        /// VCF with GT and AS (or AD) fields, plain or gzip
        #[arg(long, help_heading = "Input/Output")]
        variants: PathBuf,

        /// Output directory (must exist)
        #[arg(long, default_value = ".", help_heading = "Input/Output")]
        out_dir: PathBuf,

        /// Write the prepared inputs as JSON and the ASE count table
        #[arg(long, default_value_t = false, help_heading = "Input/Output")]
        save_input: bool,

        // === Reference panel ===
        /// Panel legend (id position a0 a1 [population AF columns])
        #[arg(long, help_heading = "Reference Panel")]
        legend: PathBuf,

        /// Panel haplotypes, one 0/1 row per legend row
        #[arg(long, help_heading = "Reference Panel")]
        haps: PathBuf,

        /// Panel sample description (ID POP GROUP)
        #[arg(long, help_heading = "Reference Panel")]
        panel_samples: Option<PathBuf>,

        /// Population for allele frequencies and the heterozygosity test
        #[arg(long, help_heading = "Reference Panel")]
        population: Option<String>,

        /// Minimum minor allele frequency in the panel
        #[arg(long, default_value = "0.05", help_heading = "Reference Panel")]
        maf: String,

        // === cis window ===
        /// Flank in bp around the gene body, or a comma-separated list of pos:ref:alt rSNPs
        #[arg(long, default_value = "100000", help_heading = "cis Window")]
        cis_window: String,

        /// LD tagging r2 threshold, or "no" to test every rSNP
        #[arg(long = "tag", default_value = "0.9", help_heading = "cis Window")]
        tag_threshold: String,

        /// Minimum info score of an rSNP
        #[arg(long, default_value = "0.3", help_heading = "cis Window")]
        info: String,

        // === ASE ===
        /// Unique fSNPs per gene (gene_id, id)
        #[arg(long, help_heading = "ASE")]
        unique_fsnps: Option<PathBuf>,

        /// Reference-bias estimates per fSNP (id, ai_mean, ai_sd)
        #[arg(long, help_heading = "ASE")]
        ai_estimates: Option<PathBuf>,

        /// fSNPs to drop (pos:ref:alt list) or a heterozygosity test p-value cutoff
        #[arg(long, help_heading = "ASE")]
        ex_fsnp: Option<String>,

        /// Minimum ASE reads for an individual to be informative
        #[arg(long, default_value = "5", help_heading = "ASE")]
        min_ase: String,

        /// Minimum number of informative individuals
        #[arg(long, default_value = "5", help_heading = "ASE")]
        min_ase_n: String,

        /// Minimum informative individuals heterozygous at the rSNP
        #[arg(long, default_value = "5", help_heading = "ASE")]
        min_ase_het: String,

        // === Covariates ===
        /// Gene-specific or sample-level covariates
        #[arg(long, help_heading = "Covariates")]
        covariates: Option<PathBuf>,

        /// Additional sample-level covariates
        #[arg(long, help_heading = "Covariates")]
        extra_covariates: Option<PathBuf>,

        // === Output Options ===
        /// Credible masses for reported posterior quantiles (comma separated)
        #[arg(long, help_heading = "Output Options")]
        prob: Option<String>,

        /// Worker threads for per-rSNP preparation
        #[arg(long, default_value = "1", help_heading = "Output Options")]
        threads: String,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Prep {
            gene,
            chrom,
            model,
            counts,
            fsnps,
            gene_coords,
            exon_coords,
            variants,
            out_dir,
            save_input,
            legend,
            haps,
            panel_samples,
            population,
            maf,
            cis_window,
            tag_threshold,
            info,
            unique_fsnps,
            ai_estimates,
            ex_fsnp,
            min_ase,
            min_ase_n,
            min_ase_het,
            covariates,
            extra_covariates,
            prob,
            threads,
        } => {
            let start = Instant::now();
            let raw = RawOptions {
                gene_id: gene,
                chrom,
                model,
                out_dir,
                counts,
                exonic_snps: fsnps,
                gene_coords,
                gene_coords_aux: exon_coords,
                variants,
                panel_legend: legend,
                panel_haplotypes: haps,
                panel_samples,
                population,
                unique_fsnps,
                covariates,
                extra_covariates,
                ai_estimates,
                cis_window,
                ex_fsnp,
                tag_threshold,
                min_ase,
                min_ase_n,
                min_ase_het,
                maf,
                info,
                prob,
                threads,
                save_input,
            };

            let config = validate(&raw)?;
            let prepared = match prepare_gene(&config) {
                Ok(p) => p,
                Err(e) => {
                    error!("{}: {}", config.gene_id, e);
                    return Err(e.into());
                }
            };
            write_outputs(&config, &prepared)?;

            match &prepared.result {
                Outcome::Success(inputs) => info!(
                    "{}: {} inputs prepared in {:.2}s",
                    config.gene_id,
                    inputs.len(),
                    start.elapsed().as_secs_f64()
                ),
                Outcome::Degraded(reason) => info!(
                    "{}: nothing to test ({}) after {:.2}s",
                    config.gene_id,
                    reason,
                    start.elapsed().as_secs_f64()
                ),
            }
        }
    }

    Ok(())
}
