use crate::config::ChartConfig;

/// Which fixed SQL template renders a chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTemplate {
    Standard,
    Instagram,
    CtoPercentual,
}

impl QueryTemplate {
    /// Pick the variant from the config's discriminator flags.
    pub fn for_config(config: &ChartConfig) -> Self {
        if config.use_instagram_template {
            QueryTemplate::Instagram
        } else if config.use_cto_percentual_template {
            QueryTemplate::CtoPercentual
        } else {
            QueryTemplate::Standard
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            QueryTemplate::Standard => STANDARD_TEMPLATE,
            QueryTemplate::Instagram => INSTAGRAM_TEMPLATE,
            QueryTemplate::CtoPercentual => CTO_PERCENTUAL_TEMPLATE,
        }
    }

    /// Templated charts read fixed schemas, so their columns are not checked
    /// against the catalog before running.
    pub fn skips_column_validation(self) -> bool {
        !matches!(self, QueryTemplate::Standard)
    }

    pub fn name(self) -> &'static str {
        match self {
            QueryTemplate::Standard => "standard",
            QueryTemplate::Instagram => "instagram",
            QueryTemplate::CtoPercentual => "cto_percentual",
        }
    }
}

pub(crate) const STANDARD_TEMPLATE: &str = r#"SELECT
    date({coluna_data}) AS data,
    SUM({coluna_valor}) AS valor
FROM {tabela}
WHERE date({coluna_data}) BETWEEN :data_inicio AND :data_fim
    {filtros_dinamicos}
GROUP BY date({coluna_data})
ORDER BY date({coluna_data})"#;

/// Posts from every mall account, summed per mall per day before filtering.
pub(crate) const INSTAGRAM_TEMPLATE: &str = r#"WITH posts AS (
    SELECT 'SCIB' AS shopping, date(p.{coluna_data}) AS data, i.{coluna_valor} AS valor
    FROM "instagram_scib"."Post" p
    JOIN "instagram_scib"."PostInsight" i ON i."postId" = p."id"
    WHERE date(p.{coluna_data}) BETWEEN :data_inicio AND :data_fim
    UNION ALL
    SELECT 'SBGP' AS shopping, date(p.{coluna_data}) AS data, i.{coluna_valor} AS valor
    FROM "instagram_sbgp"."Post" p
    JOIN "instagram_sbgp"."PostInsight" i ON i."postId" = p."id"
    WHERE date(p.{coluna_data}) BETWEEN :data_inicio AND :data_fim
    UNION ALL
    SELECT 'SBI' AS shopping, date(p.{coluna_data}) AS data, i.{coluna_valor} AS valor
    FROM "instagram_sbi"."Post" p
    JOIN "instagram_sbi"."PostInsight" i ON i."postId" = p."id"
    WHERE date(p.{coluna_data}) BETWEEN :data_inicio AND :data_fim
),
por_shopping AS (
    SELECT shopping, data, SUM(valor) AS valor
    FROM posts
    GROUP BY shopping, data
)
SELECT data, SUM(valor) AS valor
FROM por_shopping
WHERE 1 = 1
    {filtros_dinamicos}
GROUP BY data
ORDER BY data"#;

/// CTO as a percentage of gross sales, joined per day.
pub(crate) const CTO_PERCENTUAL_TEMPLATE: &str = r#"WITH cto_diario AS (
    SELECT date(CTO.data) AS data, SUM(CTO.valor) AS valor
    FROM "mapa_do_bosque"."Rgm_cto" CTO
    WHERE date(CTO.data) BETWEEN :data_inicio AND :data_fim
    {filtros_cto}
    GROUP BY date(CTO.data)
),
vb_diario AS (
    SELECT date(VB.data) AS data, SUM(VB.valor) AS valor
    FROM "mapa_do_bosque"."Rgm_valor_bruto" VB
    WHERE date(VB.data) BETWEEN :data_inicio AND :data_fim
    {filtros_vb}
    GROUP BY date(VB.data)
)
SELECT
    c.data AS data,
    CASE WHEN v.valor > 0 THEN c.valor * 100.0 / v.valor ELSE 0 END AS valor
FROM cto_diario c
JOIN vb_diario v ON v.data = c.data
ORDER BY c.data"#;
